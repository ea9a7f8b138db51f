//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (identity, boxed stream, pending tracking)
//!     → Hand off to the relay dispatcher
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - A connection slot is held for the socket's whole life, including
//!   while it serves as a transfer role

pub mod connection;
pub mod listener;

pub use connection::{BoxedStream, Connection, ConnectionId, ConnectionTracker, RelayStream};
pub use listener::{ConnectionPermit, Listener, ListenerError};
