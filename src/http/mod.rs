//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Raw bytes from a pending connection
//!     → parser.rs (find header end, classify request line)
//!     → [relay layer decides: info page, download, upload, reject]
//!     → response.rs (100 / 200 / 307 / 404 byte forms)
//!     → info.rs (static page body for non-keyed GETs)
//! ```
//!
//! # Design Decisions
//! - Only the subset of HTTP/1.1 the relay needs; no keep-alive
//! - Body bytes after the header block are handed to the relay untouched

pub mod info;
pub mod parser;
pub mod response;

pub use info::InfoPage;
pub use parser::{parse, ParsedHeader};
