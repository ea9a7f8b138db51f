//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay engine produces:
//!     → logging.rs (structured log events, conn-N / key fields)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log stream
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;
