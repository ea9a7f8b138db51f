//! Hailing Frequency relay library

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;

pub use config::schema::RelayConfig;
pub use error::RelayError;
pub use lifecycle::Shutdown;
pub use relay::Dispatcher;
