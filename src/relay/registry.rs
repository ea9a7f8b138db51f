//! Registry of in-flight transfers.
//!
//! # Responsibilities
//! - Mint rendezvous keys (`/<dir>/<serial><file name>`)
//! - Own the key → transfer mapping and which connection holds each role
//! - Hand out command handles when a role is successfully claimed
//! - Lazily evict transfers that have lacked an uploader past the grace period
//!
//! # Design Decisions
//! - One mutex guards the whole map; claims and eviction observe the same
//!   snapshot, so a transfer can't be evicted while a role is being attached
//! - The relay buffer itself lives in the transfer's worker task, never here
//! - Dropping an entry drops its command sender, which tells the worker to
//!   shut down

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::RelaySettings;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::relay::transfer::Command;

/// The two mutually exclusive attachments of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uploader,
    Downloader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Uploader => write!(f, "uploader"),
            Role::Downloader => write!(f, "downloader"),
        }
    }
}

/// Sending side of a transfer worker's command channel.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    key: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl TransferHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deliver a command to the worker.
    ///
    /// Gives the command back if the worker has already exited.
    pub fn send(&self, command: Command) -> Result<(), Command> {
        self.commands.send(command).map_err(|e| e.0)
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub key: String,
    pub uploader: Option<ConnectionId>,
    pub downloader: Option<ConnectionId>,
    pub uploader_left_at: Option<Instant>,
}

struct Entry {
    commands: mpsc::UnboundedSender<Command>,
    uploader: Option<ConnectionId>,
    downloader: Option<ConnectionId>,
    uploader_left_at: Option<Instant>,
}

impl Entry {
    fn is_stale(&self, now: Instant, grace_period: Duration) -> bool {
        self.uploader.is_none()
            && self
                .uploader_left_at
                .is_some_and(|left| now.saturating_duration_since(left) > grace_period)
    }

    fn holds(&self, id: ConnectionId) -> Option<Role> {
        if self.uploader == Some(id) {
            Some(Role::Uploader)
        } else if self.downloader == Some(id) {
            Some(Role::Downloader)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    next_serial: u64,
    transfers: HashMap<String, Entry>,
}

/// Thread-safe set of live transfers, cheap to clone.
#[derive(Clone)]
pub struct TransferRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    prefix: String,
    grace_period: Duration,
}

impl TransferRegistry {
    pub fn new(settings: &RelaySettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            prefix: settings.transfer_prefix(),
            grace_period: settings.grace_period(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new transfer whose uploader role is held by `uploader`.
    ///
    /// `file_name` is the upload path (leading slash included) and becomes
    /// the suffix of the key. Returns the handle and the receiving end the
    /// worker must consume.
    pub fn create(
        &self,
        file_name: &str,
        uploader: ConnectionId,
    ) -> (TransferHandle, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let serial = inner.next_serial;
        inner.next_serial += 1;
        let key = format!("{}{}{}", self.prefix, serial, file_name);

        inner.transfers.insert(
            key.clone(),
            Entry {
                commands: tx.clone(),
                uploader: Some(uploader),
                downloader: None,
                uploader_left_at: None,
            },
        );
        metrics::record_transfer_created();
        metrics::set_active_transfers(inner.transfers.len());
        tracing::info!(key = %key, connection_id = %uploader, "Transfer created");

        (TransferHandle { key, commands: tx }, rx)
    }

    pub fn find_by_key(&self, key: &str) -> Option<TransferSnapshot> {
        self.lock().transfers.get(key).map(|entry| TransferSnapshot {
            key: key.to_string(),
            uploader: entry.uploader,
            downloader: entry.downloader,
            uploader_left_at: entry.uploader_left_at,
        })
    }

    /// Find the transfer in which `id` currently holds a role.
    pub fn find_by_connection(&self, id: ConnectionId) -> Option<(String, Role)> {
        Self::locate(&self.lock(), id)
    }

    fn locate(inner: &RegistryInner, id: ConnectionId) -> Option<(String, Role)> {
        inner
            .transfers
            .iter()
            .find_map(|(key, entry)| entry.holds(id).map(|role| (key.clone(), role)))
    }

    /// Attach `id` as uploader of `key` if that role is free.
    pub fn claim_uploader(&self, key: &str, id: ConnectionId) -> Option<TransferHandle> {
        let mut inner = self.lock();
        let entry = inner.transfers.get_mut(key)?;
        if entry.uploader.is_some() {
            return None;
        }
        entry.uploader = Some(id);
        entry.uploader_left_at = None;
        tracing::debug!(key = %key, connection_id = %id, "Uploader role claimed");
        Some(TransferHandle { key: key.to_string(), commands: entry.commands.clone() })
    }

    /// Attach `id` as downloader of `key` if that role is free.
    pub fn claim_downloader(&self, key: &str, id: ConnectionId) -> Option<TransferHandle> {
        let mut inner = self.lock();
        let entry = inner.transfers.get_mut(key)?;
        if entry.downloader.is_some() {
            return None;
        }
        entry.downloader = Some(id);
        tracing::debug!(key = %key, connection_id = %id, "Downloader role claimed");
        Some(TransferHandle { key: key.to_string(), commands: entry.commands.clone() })
    }

    /// Clear whichever role `id` holds.
    ///
    /// Releasing the uploader starts the grace period after which the
    /// transfer becomes eligible for eviction.
    pub fn release(&self, id: ConnectionId) -> Option<(String, Role)> {
        let mut inner = self.lock();
        let (key, role) = Self::locate(&inner, id)?;
        let entry = inner.transfers.get_mut(&key)?;
        match role {
            Role::Uploader => {
                entry.uploader = None;
                entry.uploader_left_at = Some(Instant::now());
            }
            Role::Downloader => entry.downloader = None,
        }
        tracing::debug!(key = %key, connection_id = %id, role = %role, "Role released");
        Some((key, role))
    }

    /// Drop a transfer outright.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.transfers.remove(key).is_some();
        metrics::set_active_transfers(inner.transfers.len());
        removed
    }

    /// Remove every transfer that has lacked an uploader for longer than
    /// the grace period. Returns how many were evicted.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let grace_period = self.grace_period;
        let mut inner = self.lock();
        let before = inner.transfers.len();

        inner.transfers.retain(|key, entry| {
            let stale = entry.is_stale(now, grace_period);
            if stale {
                tracing::info!(key = %key, "Evicted transfer without uploader");
            }
            !stale
        });

        let evicted = before - inner.transfers.len();
        if evicted > 0 {
            metrics::record_transfers_evicted(evicted);
            metrics::set_active_transfers(inner.transfers.len());
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}
