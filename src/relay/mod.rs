//! Rendezvous and relay engine.
//!
//! # Data Flow
//! ```text
//! accepted socket
//!     → dispatcher.rs (evict stale transfers, spawn per-connection task)
//!     → pending.rs (accumulate header, classify via http::parser)
//!         → info page / 404 / drop          (answered directly)
//!         → registry.rs (create or claim a role under one lock)
//!     → transfer.rs (worker task relays uploader → downloader)
//!     → registry.rs (release roles, remove on completion, evict)
//! ```
//!
//! # Design Decisions
//! - The registry mutex and each transfer's worker are separate exclusion
//!   boundaries; nothing holds the registry lock across an await
//! - Sockets move by value: pending task → command channel → worker

pub mod dispatcher;
pub mod pending;
pub mod registry;
pub mod transfer;

use crate::config::RelaySettings;
use crate::http::InfoPage;

pub use dispatcher::Dispatcher;
pub use pending::{Outcome, PendingConnection};
pub use registry::{Role, TransferHandle, TransferRegistry, TransferSnapshot};
pub use transfer::{Command, Transfer, TransferWorker};

/// Everything a connection task needs to classify and route a socket.
#[derive(Clone)]
pub struct RelayContext {
    pub registry: TransferRegistry,
    pub settings: RelaySettings,
    pub transfer_prefix: String,
    pub info_page: InfoPage,
}

impl RelayContext {
    pub fn new(settings: RelaySettings, info_page: InfoPage) -> Self {
        Self {
            registry: TransferRegistry::new(&settings),
            transfer_prefix: settings.transfer_prefix(),
            settings,
            info_page,
        }
    }
}
