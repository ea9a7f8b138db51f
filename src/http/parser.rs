//! Request header classification.
//!
//! # Responsibilities
//! - Find the end of the header block (`\r\n\r\n`)
//! - Classify the request line into download, info, upload or invalid
//! - Extract the declared `Content-Length` of uploads
//!
//! # Design Decisions
//! - Pure function over the accumulated bytes; no state between calls
//! - `Unknown` means "keep reading", never an error
//! - Methods and header names are case-insensitive, paths are not

/// Terminator of an HTTP header block.
pub const HEADER_END: &[u8] = b"\r\n\r\n";

/// Classification of a pending connection's header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHeader {
    /// No complete header block yet.
    Unknown,

    /// Unrecognized method or malformed request line.
    Invalid,

    /// PUT/POST starting or continuing an upload.
    Uploader {
        /// Request path, always starting with `/`.
        path: String,
        /// Declared body length, 0 when absent or unparsable.
        content_length: u64,
        /// Offset of the first body byte in the parsed buffer.
        body_offset: usize,
    },

    /// GET for a keyed transfer path.
    Downloader { key: String },

    /// GET for anything outside the transfer prefix.
    Info { path: String },
}

impl ParsedHeader {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedHeader::Unknown => "unknown",
            ParsedHeader::Invalid => "invalid",
            ParsedHeader::Uploader { .. } => "uploader",
            ParsedHeader::Downloader { .. } => "downloader",
            ParsedHeader::Info { .. } => "info",
        }
    }
}

/// Request methods the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if token.eq_ignore_ascii_case("PUT") {
            Some(Method::Put)
        } else if token.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else {
            None
        }
    }
}

/// Locate the header terminator in `buffer`.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_END.len())
        .position(|window| window == HEADER_END)
}

/// Classify the bytes received so far on a new connection.
///
/// `transfer_prefix` is the reserved path prefix including both slashes,
/// e.g. `/relays/`.
pub fn parse(buffer: &[u8], transfer_prefix: &str) -> ParsedHeader {
    let Some(header_end) = find_header_end(buffer) else {
        return ParsedHeader::Unknown;
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return ParsedHeader::Invalid;
    };
    if !version.get(..4).is_some_and(|v| v.eq_ignore_ascii_case("HTTP")) {
        return ParsedHeader::Invalid;
    }

    match Method::parse(method) {
        Some(Method::Get) => {
            if path.starts_with(transfer_prefix) {
                ParsedHeader::Downloader { key: path.to_string() }
            } else {
                ParsedHeader::Info { path: path.to_string() }
            }
        }
        Some(Method::Put) | Some(Method::Post) => {
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            ParsedHeader::Uploader {
                path,
                content_length: content_length(lines),
                body_offset: header_end + HEADER_END.len(),
            }
        }
        None => ParsedHeader::Invalid,
    }
}

fn content_length<'a>(lines: impl Iterator<Item = &'a str>) -> u64 {
    let mut length = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            length = value.trim().parse().unwrap_or(0);
        }
    }
    length
}

/// Whether an upload path names an existing key rather than a file name.
///
/// A fresh upload looks like `/name`; a continuation after the redirect
/// handshake carries a second separator, e.g. `/relays/0/name`.
pub fn is_continuation(path: &str) -> bool {
    path.get(1..).is_some_and(|rest| rest.contains('/'))
}
