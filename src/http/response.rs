//! Responses written by the relay.
//!
//! # Responsibilities
//! - Build the byte form of every status the relay emits (100, 200, 307, 404)
//! - Carry the rendezvous key in redirect `location` headers
//! - Advertise the expected body length to downloaders when it is known
//!
//! # Design Decisions
//! - Responses are plain byte buffers; the caller owns the write
//! - Redirects ask the client to close so the follow-up request uses a
//!   fresh connection

use bytes::{BufMut, Bytes, BytesMut};

const NOT_FOUND_BODY: &str =
    "<html><head><title>404</title></head><body>404 Not Found</body></html>";

/// Body text used by the redirect and continue responses.
fn upload_notice(key: &str) -> String {
    format!("Uploading to {}", key)
}

/// Interim response accepting an upload continuation.
pub fn continue_100() -> Bytes {
    Bytes::from_static(b"HTTP/1.1 100 Continue\r\n\r\n")
}

/// Redirect carrying the rendezvous key.
///
/// Used both for the initial handshake and as the "done" signal once the
/// declared length has been forwarded.
pub fn redirect_307(key: &str) -> Bytes {
    let body = upload_notice(key);
    let mut out = BytesMut::with_capacity(128 + key.len() + body.len());
    out.put_slice(b"HTTP/1.1 307 Temporary Redirect\r\n");
    out.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.put_slice(format!("location: {}\r\n", key).as_bytes());
    out.put_slice(b"Connection: close\r\n");
    out.put_slice(b"\r\n");
    out.put_slice(body.as_bytes());
    out.freeze()
}

/// Status line and headers of a 200 response.
///
/// `Content-Length` is only written when `content_length` is known.
pub fn ok_200_headers(server_name: &str, content_length: Option<u64>) -> Bytes {
    let mut out = BytesMut::with_capacity(96 + server_name.len());
    out.put_slice(b"HTTP/1.1 200 OK\r\n");
    out.put_slice(format!("Server: {}\r\n", server_name).as_bytes());
    if let Some(length) = content_length {
        out.put_slice(format!("Content-Length: {}\r\n", length).as_bytes());
    }
    out.put_slice(b"\r\n");
    out.freeze()
}

/// Complete 200 response for the informational page.
pub fn info_page(server_name: &str, html: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(128 + server_name.len() + html.len());
    out.put_slice(b"HTTP/1.1 200 OK\r\n");
    out.put_slice(format!("Server: {}\r\n", server_name).as_bytes());
    out.put_slice(b"Content-Type: text/html\r\n");
    out.put_slice(format!("Content-Length: {}\r\n", html.len()).as_bytes());
    out.put_slice(b"\r\n");
    out.put_slice(html);
    out.freeze()
}

/// Complete 404 response with a small HTML body.
pub fn not_found_404() -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        NOT_FOUND_BODY.len(),
        NOT_FOUND_BODY
    ))
}
