//! Connection identity and pending-connection tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and role ownership
//! - Erase the concrete stream type so transfers can hold any socket
//! - Count connections that have not yet produced a full header block

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

use crate::net::listener::ConnectionPermit;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any bidirectional byte stream the relay can splice.
pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayStream for T {}

pub type BoxedStream = Box<dyn RelayStream>;

/// An accepted socket together with its identity and connection slot.
///
/// The permit travels with the stream, so a socket promoted into a
/// transfer keeps holding its slot until the transfer drops it.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    pub stream: BoxedStream,
    _permit: Option<ConnectionPermit>,
}

impl Connection {
    pub fn new(stream: BoxedStream, peer: Option<SocketAddr>, permit: Option<ConnectionPermit>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            stream,
            _permit: permit,
        }
    }

    /// Wrap a bare stream without a peer address or permit.
    pub fn from_stream<S: RelayStream + 'static>(stream: S) -> Self {
        Self::new(Box::new(stream), None, None)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Tracks connections that are still waiting for a complete header block.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of pending connections.
    pending_count: Arc<AtomicU64>,
    /// Woken whenever a tracked connection leaves the pending state.
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        let count = self.pending_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_pending_connections(count);
        ConnectionGuard {
            pending_count: Arc::clone(&self.pending_count),
            idle: Arc::clone(&self.idle),
            id,
        }
    }

    /// Get current pending connection count.
    pub fn pending_count(&self) -> u64 {
        self.pending_count.load(Ordering::SeqCst)
    }

    /// Wait until no connection is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard that tracks a pending connection's lifetime.
/// Decrements the pending count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    pending_count: Arc<AtomicU64>,
    idle: Arc<Notify>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.pending_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_pending_connections(count);
        self.idle.notify_waiters();
        tracing::trace!(connection_id = %self.id, "Connection left pending state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert_eq!(format!("{}", ConnectionId(7)), "conn-7");
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.pending_count(), 0);

        let guard1 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.pending_count(), 1);

        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.pending_count(), 2);

        drop(guard1);
        assert_eq!(tracker.pending_count(), 1);

        drop(guard2);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(ConnectionId::new());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle did not return")
            .unwrap();
    }

    #[tokio::test]
    async fn connection_wraps_any_stream() {
        let (a, _b) = tokio::io::duplex(64);
        let conn = Connection::from_stream(a);
        assert!(conn.peer().is_none());
        assert!(conn.id().as_u64() > 0);
    }
}
