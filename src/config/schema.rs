//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Relay engine tuning.
    pub relay: RelaySettings,

    /// Informational page served for non-keyed GET requests.
    pub info_page: InfoPageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

impl ListenerConfig {
    /// Replace the port of the bind address, keeping the host.
    ///
    /// Falls back to the unspecified IPv4 address when the current
    /// bind address does not parse.
    pub fn set_port(&mut self, port: u16) {
        let addr = match self.bind_address.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr
            }
            Err(_) => SocketAddr::from(([0, 0, 0, 0], port)),
        };
        self.bind_address = addr.to_string();
    }
}

/// Relay engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Reserved path segment under which all keyed transfers live.
    pub transfer_dir: String,

    /// Maximum bytes held in a transfer's relay buffer.
    pub buffer_capacity: usize,

    /// Read window applied to an uploader while no downloader is attached.
    pub idle_window: usize,

    /// Seconds a transfer may lack an uploader before it is evicted.
    pub grace_period_secs: u64,

    /// Largest header block accepted from a pending connection.
    pub max_header_bytes: usize,

    /// Value of the `Server` header on 200 responses.
    pub server_name: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            transfer_dir: "relays".to_string(),
            buffer_capacity: 1024 * 1024,
            idle_window: 1000,
            grace_period_secs: 5,
            max_header_bytes: 16 * 1024,
            server_name: "Hailing Frequency".to_string(),
        }
    }
}

impl RelaySettings {
    /// The reserved prefix including both separators, e.g. `/relays/`.
    pub fn transfer_prefix(&self) -> String {
        format!("/{}/", self.transfer_dir)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Informational page configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InfoPageConfig {
    /// HTML file served verbatim. The built-in page is used when unset
    /// or unreadable.
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
