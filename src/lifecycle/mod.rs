//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → dispatcher stops accepting → pending sockets drain → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain pending, exit
//! - Draining has a deadline; open transfers are not waited on

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
