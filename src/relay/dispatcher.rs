//! Accept loop and per-connection task spawning.
//!
//! # Responsibilities
//! - Run the lazy eviction sweep on every new connection
//! - Give each accepted socket its own pending-connection task
//! - Stop accepting on shutdown and wait briefly for pending sockets
//!
//! # Design Decisions
//! - Accept errors are logged and retried; only a closed listener ends the loop
//! - Established transfers are not drained on shutdown; their workers are
//!   dropped with the runtime

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::{RelayConfig, RelaySettings};
use crate::http::InfoPage;
use crate::net::{Connection, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::relay::pending::{Outcome, PendingConnection};
use crate::relay::{RelayContext, TransferRegistry};

/// How long to back off after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long shutdown waits for sockets still sending their header.
const PENDING_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes accepted sockets into the relay.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<RelayContext>,
    tracker: ConnectionTracker,
}

impl Dispatcher {
    pub fn new(settings: RelaySettings, info_page: InfoPage) -> Self {
        Self {
            ctx: Arc::new(RelayContext::new(settings, info_page)),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Build a dispatcher from the full configuration, loading the
    /// configured info page if there is one.
    pub fn from_config(config: &RelayConfig) -> Self {
        let info_page = InfoPage::load(config.info_page.path.as_deref().map(std::path::Path::new));
        Self::new(config.relay.clone(), info_page)
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.ctx.registry
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Take ownership of a new socket.
    ///
    /// Stale transfers are evicted before the socket is looked at.
    pub fn accept(&self, conn: Connection) -> JoinHandle<Option<Outcome>> {
        metrics::record_connection_accepted();
        self.ctx.registry.evict_stale(Instant::now());

        let id = conn.id();
        tracing::debug!(connection_id = %id, peer = ?conn.peer(), "New connection");

        let guard = self.tracker.track(id);
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            match PendingConnection::new(conn, Some(guard)).process(&ctx).await {
                Ok(outcome) => {
                    tracing::debug!(connection_id = %id, outcome = ?outcome, "Connection left pending state");
                    Some(outcome)
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Connection dropped");
                    None
                }
            }
        })
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run<F>(self, listener: Listener, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        self.accept(Connection::new(Box::new(stream), Some(peer), Some(permit)));
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let pending = self.tracker.pending_count();
        if pending > 0 {
            tracing::info!(pending, "Waiting for pending connections");
            if tokio::time::timeout(PENDING_DRAIN_TIMEOUT, self.tracker.wait_idle()).await.is_err() {
                tracing::warn!(
                    pending = self.tracker.pending_count(),
                    "Pending connections still open after drain timeout"
                );
            }
        }

        tracing::info!(active_transfers = self.ctx.registry.len(), "Dispatcher stopped");
        Ok(())
    }
}
