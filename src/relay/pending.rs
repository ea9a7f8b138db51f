//! Pending connection handling.
//!
//! # Responsibilities
//! - Accumulate bytes until a complete header block arrives
//! - Answer info-page, unknown-key and malformed requests directly
//! - Promote uploaders and downloaders into the transfer registry
//!
//! # Design Decisions
//! - A pending connection owns its socket until it is promoted; promotion
//!   moves the socket into the transfer's worker and ends the pending record
//! - Body bytes that arrived with an upload header travel with the socket

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{RelayError, Result};
use crate::http::parser::{self, ParsedHeader};
use crate::http::response;
use crate::net::connection::ConnectionGuard;
use crate::net::{Connection, ConnectionId};
use crate::observability::metrics;
use crate::relay::registry::{Role, TransferHandle};
use crate::relay::transfer::{Command, Transfer, TransferWorker};
use crate::relay::RelayContext;

/// Size of each read while waiting for a header block.
const READ_CHUNK: usize = 4096;

/// How a pending connection left the pending state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Served the informational page.
    Info,
    /// Socket now belongs to a transfer.
    Promoted { key: String, role: Role },
    /// Answered 404: unknown key, occupied role, or dead redirect.
    NotFound,
    /// Malformed request; closed without a response.
    Invalid,
}

/// A socket that has not yet produced a classifiable header block.
pub struct PendingConnection {
    conn: Connection,
    buffer: BytesMut,
    _guard: Option<ConnectionGuard>,
}

impl PendingConnection {
    pub fn new(conn: Connection, guard: Option<ConnectionGuard>) -> Self {
        Self {
            conn,
            buffer: BytesMut::new(),
            _guard: guard,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Append a received chunk and classify everything buffered so far.
    ///
    /// An oversized buffer without a header terminator is `Invalid`.
    pub fn on_bytes(&mut self, chunk: &[u8], transfer_prefix: &str, max_header_bytes: usize) -> ParsedHeader {
        self.buffer.extend_from_slice(chunk);
        match parser::parse(&self.buffer, transfer_prefix) {
            ParsedHeader::Unknown if self.buffer.len() > max_header_bytes => {
                tracing::debug!(
                    connection_id = %self.conn.id(),
                    buffered = self.buffer.len(),
                    "Header block too large"
                );
                ParsedHeader::Invalid
            }
            parsed => parsed,
        }
    }

    /// Read until the request is classified, then act on it.
    pub async fn process(mut self, ctx: &RelayContext) -> Result<Outcome> {
        let header = self.read_header(ctx).await?;
        tracing::debug!(connection_id = %self.conn.id(), kind = header.kind(), "Request classified");
        self.classify(header, ctx).await
    }

    async fn read_header(&mut self, ctx: &RelayContext) -> Result<ParsedHeader> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = self.conn.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RelayError::ClosedBeforeHeader);
            }
            let parsed = self.on_bytes(&chunk[..n], &ctx.transfer_prefix, ctx.settings.max_header_bytes);
            if parsed != ParsedHeader::Unknown {
                return Ok(parsed);
            }
        }
    }

    async fn classify(self, header: ParsedHeader, ctx: &RelayContext) -> Result<Outcome> {
        match header {
            ParsedHeader::Unknown | ParsedHeader::Invalid => {
                metrics::record_rejected("invalid");
                tracing::debug!(connection_id = %self.conn.id(), "Dropping malformed request");
                Ok(Outcome::Invalid)
            }
            ParsedHeader::Info { path } => self.serve_info(&path, ctx).await,
            ParsedHeader::Downloader { key } => self.attach_downloader(key, ctx).await,
            ParsedHeader::Uploader { path, content_length, body_offset } => {
                if parser::is_continuation(&path) {
                    self.continue_upload(path, content_length, body_offset, ctx).await
                } else {
                    self.start_upload(path, content_length, body_offset, ctx).await
                }
            }
        }
    }

    async fn serve_info(mut self, path: &str, ctx: &RelayContext) -> Result<Outcome> {
        tracing::debug!(connection_id = %self.conn.id(), path = %path, "Serving info page");
        let page = response::info_page(&ctx.settings.server_name, ctx.info_page.html());
        reply_and_close(&mut self.conn, &page).await?;
        Ok(Outcome::Info)
    }

    async fn attach_downloader(self, key: String, ctx: &RelayContext) -> Result<Outcome> {
        let id = self.conn.id();
        match ctx.registry.claim_downloader(&key, id) {
            Some(handle) => deliver(handle, Command::AttachDownloader { conn: self.conn }, Role::Downloader, ctx).await,
            None => {
                tracing::info!(connection_id = %id, key = %key, "Download for unknown or busy key");
                metrics::record_rejected("unknown_key");
                not_found(self.conn).await
            }
        }
    }

    /// A fresh upload: mint a key, start its worker, answer with the redirect.
    async fn start_upload(
        mut self,
        path: String,
        content_length: u64,
        body_offset: usize,
        ctx: &RelayContext,
    ) -> Result<Outcome> {
        let leftover = self.take_body(body_offset);
        let (handle, commands) = ctx.registry.create(&path, self.conn.id());
        let key = handle.key().to_string();

        let transfer = Transfer::new(key.clone(), ctx.settings.buffer_capacity, ctx.settings.idle_window);
        TransferWorker::new(transfer, commands, ctx.registry.clone(), ctx.settings.server_name.clone()).spawn();

        tracing::info!(
            connection_id = %self.conn.id(),
            key = %key,
            content_length,
            "Redirect handshake started"
        );
        let command = Command::AttachUploader {
            conn: self.conn,
            reply: response::redirect_307(&key),
            leftover,
            content_length,
        };
        deliver(handle, command, Role::Uploader, ctx).await
    }

    /// A continuation after the redirect: the path is an existing key.
    async fn continue_upload(
        mut self,
        key: String,
        content_length: u64,
        body_offset: usize,
        ctx: &RelayContext,
    ) -> Result<Outcome> {
        let id = self.conn.id();
        let Some(handle) = ctx.registry.claim_uploader(&key, id) else {
            tracing::info!(connection_id = %id, key = %key, "Upload continuation for unknown or busy key");
            metrics::record_rejected("unmatched_continuation");
            return not_found(self.conn).await;
        };

        let leftover = self.take_body(body_offset);
        let command = Command::AttachUploader {
            conn: self.conn,
            reply: response::continue_100(),
            leftover,
            content_length,
        };
        deliver(handle, command, Role::Uploader, ctx).await
    }

    fn take_body(&mut self, body_offset: usize) -> Bytes {
        let offset = body_offset.min(self.buffer.len());
        self.buffer.split_off(offset).freeze()
    }
}

/// Hand a claimed role to the transfer's worker.
///
/// If the worker already stopped, the claim is undone, the client gets a
/// 404 and the error reports the lost transfer.
async fn deliver(handle: TransferHandle, command: Command, role: Role, ctx: &RelayContext) -> Result<Outcome> {
    let key = handle.key().to_string();
    match handle.send(command) {
        Ok(()) => Ok(Outcome::Promoted { key, role }),
        Err(command) => {
            let mut conn = command.into_connection();
            ctx.registry.release(conn.id());
            metrics::record_rejected("transfer_gone");
            reply_and_close(&mut conn, &response::not_found_404()).await?;
            Err(RelayError::TransferGone(key))
        }
    }
}

async fn not_found(mut conn: Connection) -> Result<Outcome> {
    reply_and_close(&mut conn, &response::not_found_404()).await?;
    Ok(Outcome::NotFound)
}

async fn reply_and_close(conn: &mut Connection, bytes: &[u8]) -> Result<()> {
    conn.stream.write_all(bytes).await?;
    conn.stream.flush().await?;
    conn.stream.shutdown().await?;
    Ok(())
}
