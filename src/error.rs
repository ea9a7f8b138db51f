//! Errors surfaced by the relay engine.
//!
//! Every variant is handled at the connection or transfer boundary; none
//! of them stop the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before a complete header block")]
    ClosedBeforeHeader,

    #[error("transfer {0} stopped before the role could be attached")]
    TransferGone(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
