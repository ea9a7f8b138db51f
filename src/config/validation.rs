//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, addresses parse)
//! - Keep the transfer prefix a single path segment
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("relay.buffer_capacity must be greater than zero")]
    BufferCapacity,

    #[error("relay.idle_window ({window}) exceeds relay.buffer_capacity ({capacity})")]
    IdleWindow { window: usize, capacity: usize },

    #[error("relay.transfer_dir {0:?} must be a single non-empty path segment")]
    TransferDir(String),

    #[error("relay.max_header_bytes must be greater than zero")]
    MaxHeaderBytes,

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    let relay = &config.relay;
    if relay.buffer_capacity == 0 {
        errors.push(ValidationError::BufferCapacity);
    }
    if relay.idle_window > relay.buffer_capacity {
        errors.push(ValidationError::IdleWindow {
            window: relay.idle_window,
            capacity: relay.buffer_capacity,
        });
    }
    if relay.transfer_dir.is_empty() || relay.transfer_dir.contains('/') {
        errors.push(ValidationError::TransferDir(relay.transfer_dir.clone()));
    }
    if relay.max_header_bytes == 0 {
        errors.push(ValidationError::MaxHeaderBytes);
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
