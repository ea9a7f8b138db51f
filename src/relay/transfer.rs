//! Transfer relay unit.
//!
//! # Responsibilities
//! - Hold the bounded relay buffer and the byte accounting of one key
//! - Own the uploader and downloader streams once they are attached
//! - Move bytes uploader → buffer → downloader in arrival order
//! - Detect completion against the declared length and signal it
//!
//! # Design Decisions
//! - One worker task per transfer is the only code touching its buffer
//!   and streams; the registry only records who holds which role
//! - The buffer holds at most `capacity` bytes, and only a small window
//!   while nobody downloads; reads beyond that wait in a staging queue
//!   capped at another `capacity`, after which the uploader is not read
//! - All waiting is readiness-driven through `select!`; a slow downloader
//!   stalls its own transfer and nothing else
//!
//! # Lifecycle
//! ```text
//! create (registry) → AttachUploader (307 handshake)
//!     → uploader leaves → AttachUploader (100 continuation)
//!     → AttachDownloader (200 headers) → relay
//!     → declared length reached → 307 "done", both closed, entry removed
//!   or uploader leaves → buffer drained → downloader closed → evicted later
//! ```

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::http::response;
use crate::net::Connection;
use crate::observability::metrics;
use crate::relay::registry::TransferRegistry;

/// Largest single read from an uploader.
const READ_CHUNK: usize = 64 * 1024;

/// Scratch space for noticing a downloader hang up while idle.
const PROBE_SIZE: usize = 512;

/// Role attachments delivered to a transfer's worker.
#[derive(Debug)]
pub enum Command {
    /// Become the uploader. `reply` is written before any relaying and
    /// `leftover` holds body bytes that arrived with the request header.
    AttachUploader {
        conn: Connection,
        reply: Bytes,
        leftover: Bytes,
        content_length: u64,
    },
    /// Become the downloader; 200 headers are written on attach.
    AttachDownloader { conn: Connection },
}

impl Command {
    /// Recover the socket of a command that could not be delivered.
    pub fn into_connection(self) -> Connection {
        match self {
            Command::AttachUploader { conn, .. } | Command::AttachDownloader { conn } => conn,
        }
    }
}

/// Buffer and byte accounting of a single transfer.
#[derive(Debug)]
pub struct Transfer {
    key: String,
    buffer: BytesMut,
    capacity: usize,
    idle_window: usize,
    total_forwarded: u64,
    expected_length: u64,
}

impl Transfer {
    pub fn new(key: impl Into<String>, capacity: usize, idle_window: usize) -> Self {
        Self {
            key: key.into(),
            buffer: BytesMut::new(),
            capacity,
            idle_window,
            total_forwarded: 0,
            expected_length: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes waiting for the downloader.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_drained(&self) -> bool {
        self.buffer.is_empty()
    }

    /// How many more bytes may be pulled from the uploader right now.
    ///
    /// Without a downloader the window shrinks to `idle_window`.
    pub fn room(&self, downloader_attached: bool) -> usize {
        let limit = if downloader_attached {
            self.capacity
        } else {
            self.idle_window.min(self.capacity)
        };
        limit.saturating_sub(self.buffer.len())
    }

    /// Append as much of `bytes` as the current room allows.
    pub fn fill(&mut self, bytes: &[u8], downloader_attached: bool) -> usize {
        let accepted = bytes.len().min(self.room(downloader_attached));
        self.buffer.extend_from_slice(&bytes[..accepted]);
        accepted
    }

    /// Drop a prefix the downloader accepted and count it as forwarded.
    pub fn consume(&mut self, written: usize) {
        let written = written.min(self.buffer.len());
        self.buffer.advance(written);
        self.total_forwarded += written as u64;
    }

    /// Record the uploader's declared length; 0 means unbounded.
    pub fn set_expected_length(&mut self, length: u64) {
        self.expected_length = length;
    }

    pub fn expected_length(&self) -> Option<u64> {
        (self.expected_length > 0).then_some(self.expected_length)
    }

    pub fn total_forwarded(&self) -> u64 {
        self.total_forwarded
    }

    pub fn is_complete(&self) -> bool {
        self.expected_length > 0 && self.total_forwarded >= self.expected_length
    }

    pub fn reset(&mut self) {
        self.total_forwarded = 0;
    }
}

enum Event {
    Command(Command),
    Evicted,
    Uploaded(usize),
    UploaderClosed(Option<io::Error>),
    Forwarded(usize),
    DownloaderChatter,
    DownloaderClosed(Option<io::Error>),
}

/// Task that drives one transfer until it completes or is evicted.
pub struct TransferWorker {
    transfer: Transfer,
    /// Uploader bytes received but not yet admitted to the buffer.
    staged: BytesMut,
    uploader: Option<Connection>,
    downloader: Option<Connection>,
    commands: mpsc::UnboundedReceiver<Command>,
    registry: TransferRegistry,
    server_name: String,
}

impl TransferWorker {
    pub fn new(
        transfer: Transfer,
        commands: mpsc::UnboundedReceiver<Command>,
        registry: TransferRegistry,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            transfer,
            staged: BytesMut::new(),
            uploader: None,
            downloader: None,
            commands,
            registry,
            server_name: server_name.into(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut scratch = vec![0u8; READ_CHUNK];
        let mut probe = [0u8; PROBE_SIZE];

        loop {
            self.admit_staged();
            // The uploader stays polled while the buffer is full; overflow
            // queues in `staged`, capped at one more buffer.
            let room = self
                .transfer
                .capacity()
                .saturating_sub(self.staged.len())
                .min(scratch.len());

            let event = tokio::select! {
                command = self.commands.recv() => command.map_or(Event::Evicted, Event::Command),
                event = read_uploader(self.uploader.as_mut(), &mut scratch[..room]) => event,
                event = write_downloader(self.downloader.as_mut(), self.transfer.pending(), &mut probe) => event,
            };

            match event {
                Event::Command(Command::AttachUploader { conn, reply, leftover, content_length }) => {
                    self.attach_uploader(conn, reply, leftover, content_length).await;
                    // A continuation may declare less than was already sent.
                    if self.transfer.is_complete() {
                        self.complete().await;
                        return;
                    }
                }
                Event::Command(Command::AttachDownloader { conn }) => {
                    self.attach_downloader(conn).await;
                }
                Event::Evicted => {
                    self.evicted().await;
                    return;
                }
                Event::Uploaded(n) => {
                    self.stage(&scratch[..n]);
                }
                Event::UploaderClosed(error) => {
                    self.uploader_closed(error).await;
                }
                Event::Forwarded(n) => {
                    self.transfer.consume(n);
                    metrics::record_bytes_forwarded(n);
                    if self.transfer.is_complete() {
                        self.complete().await;
                        return;
                    }
                    self.finish_download_if_drained().await;
                }
                Event::DownloaderChatter => {}
                Event::DownloaderClosed(error) => {
                    self.downloader_closed(error);
                }
            }
        }
    }

    /// Buffer fresh uploader bytes, queueing whatever does not fit behind
    /// the bytes already staged.
    fn stage(&mut self, bytes: &[u8]) {
        let admitted = if self.staged.is_empty() {
            self.transfer.fill(bytes, self.downloader.is_some())
        } else {
            0
        };
        self.staged.extend_from_slice(&bytes[admitted..]);
    }

    fn admit_staged(&mut self) {
        if !self.staged.is_empty() {
            let admitted = self.transfer.fill(&self.staged, self.downloader.is_some());
            self.staged.advance(admitted);
        }
    }

    async fn attach_uploader(&mut self, mut conn: Connection, reply: Bytes, leftover: Bytes, content_length: u64) {
        if let Some(current) = &self.uploader {
            tracing::warn!(
                key = %self.transfer.key(),
                current = %current.id(),
                rejected = %conn.id(),
                "Uploader role already attached"
            );
            self.registry.release(conn.id());
            return;
        }

        if let Err(e) = write_response(&mut conn, &reply).await {
            tracing::debug!(key = %self.transfer.key(), connection_id = %conn.id(), error = %e, "Uploader handshake write failed");
            self.registry.release(conn.id());
            return;
        }

        tracing::info!(
            key = %self.transfer.key(),
            connection_id = %conn.id(),
            content_length,
            early_bytes = leftover.len(),
            "Uploader attached"
        );
        self.transfer.set_expected_length(content_length);
        self.staged.extend_from_slice(&leftover);
        self.uploader = Some(conn);
    }

    async fn attach_downloader(&mut self, mut conn: Connection) {
        // The transfer may have been evicted between the claim and delivery.
        let claimed = self
            .registry
            .find_by_key(self.transfer.key())
            .is_some_and(|snapshot| snapshot.downloader == Some(conn.id()));
        if !claimed {
            tracing::info!(
                key = %self.transfer.key(),
                connection_id = %conn.id(),
                "Downloader arrived after eviction"
            );
            metrics::record_rejected("transfer_gone");
            if let Err(e) = write_response(&mut conn, &response::not_found_404()).await {
                tracing::debug!(connection_id = %conn.id(), error = %e, "404 write failed");
            }
            close(conn).await;
            return;
        }

        let headers = response::ok_200_headers(&self.server_name, self.transfer.expected_length());
        if let Err(e) = write_response(&mut conn, &headers).await {
            tracing::debug!(key = %self.transfer.key(), connection_id = %conn.id(), error = %e, "Downloader header write failed");
            self.registry.release(conn.id());
            return;
        }

        tracing::info!(
            key = %self.transfer.key(),
            connection_id = %conn.id(),
            buffered = self.transfer.buffered(),
            "Downloader attached"
        );
        self.downloader = Some(conn);
    }

    async fn uploader_closed(&mut self, error: Option<io::Error>) {
        let Some(conn) = self.uploader.take() else {
            return;
        };
        self.registry.release(conn.id());
        match error {
            Some(e) => tracing::debug!(key = %self.transfer.key(), connection_id = %conn.id(), error = %e, "Uploader failed"),
            None => tracing::info!(
                key = %self.transfer.key(),
                connection_id = %conn.id(),
                buffered = self.transfer.buffered(),
                "Uploader disconnected"
            ),
        }
        drop(conn);
        self.finish_download_if_drained().await;
    }

    fn downloader_closed(&mut self, error: Option<io::Error>) {
        let Some(conn) = self.downloader.take() else {
            return;
        };
        self.registry.release(conn.id());
        tracing::info!(
            key = %self.transfer.key(),
            connection_id = %conn.id(),
            forwarded = self.transfer.total_forwarded(),
            error = ?error,
            "Downloader disconnected"
        );
    }

    /// Once the uploader is gone and every byte went out, the download is over.
    async fn finish_download_if_drained(&mut self) {
        if self.uploader.is_some() || !self.transfer.is_drained() || !self.staged.is_empty() {
            return;
        }
        if let Some(conn) = self.downloader.take() {
            self.registry.release(conn.id());
            tracing::info!(
                key = %self.transfer.key(),
                connection_id = %conn.id(),
                forwarded = self.transfer.total_forwarded(),
                "Download finished"
            );
            close(conn).await;
        }
    }

    async fn complete(&mut self) {
        let key = self.transfer.key().to_string();

        if let Some(mut uploader) = self.uploader.take() {
            let done = response::redirect_307(&key);
            if let Err(e) = write_response(&mut uploader, &done).await {
                tracing::debug!(key = %key, connection_id = %uploader.id(), error = %e, "Completion notice failed");
            }
            close(uploader).await;
        }
        if let Some(downloader) = self.downloader.take() {
            close(downloader).await;
        }

        tracing::info!(key = %key, bytes = self.transfer.total_forwarded(), "Transfer complete");
        self.transfer.reset();
        self.registry.remove(&key);
        metrics::record_transfer_completed();
    }

    async fn evicted(&mut self) {
        tracing::debug!(key = %self.transfer.key(), dropped = self.transfer.buffered(), "Transfer worker stopping");
        if let Some(downloader) = self.downloader.take() {
            close(downloader).await;
        }
        self.uploader = None;
    }
}

async fn read_uploader(uploader: Option<&mut Connection>, scratch: &mut [u8]) -> Event {
    // No uploader, or staging is full: leave the socket unread.
    let Some(conn) = uploader else {
        return std::future::pending().await;
    };
    if scratch.is_empty() {
        return std::future::pending().await;
    }

    match conn.stream.read(scratch).await {
        Ok(0) => Event::UploaderClosed(None),
        Ok(n) => Event::Uploaded(n),
        Err(e) => Event::UploaderClosed(Some(e)),
    }
}

async fn write_downloader(downloader: Option<&mut Connection>, data: &[u8], probe: &mut [u8]) -> Event {
    let Some(conn) = downloader else {
        return std::future::pending().await;
    };

    if data.is_empty() {
        return match conn.stream.read(probe).await {
            Ok(0) => Event::DownloaderClosed(None),
            Ok(_) => Event::DownloaderChatter,
            Err(e) => Event::DownloaderClosed(Some(e)),
        };
    }

    match conn.stream.write(data).await {
        Ok(0) => Event::DownloaderClosed(None),
        Ok(n) => Event::Forwarded(n),
        Err(e) => Event::DownloaderClosed(Some(e)),
    }
}

async fn write_response(conn: &mut Connection, bytes: &[u8]) -> io::Result<()> {
    conn.stream.write_all(bytes).await?;
    conn.stream.flush().await
}

async fn close(mut conn: Connection) {
    let result = async {
        conn.stream.flush().await?;
        conn.stream.shutdown().await
    }
    .await;
    if let Err(e) = result {
        tracing::trace!(connection_id = %conn.id(), error = %e, "Shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelaySettings;
    use std::time::{Duration, Instant};
    use tokio::io::DuplexStream;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Read one response head (through the blank line).
    async fn read_head(stream: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await.unwrap();
            assert_eq!(n, 1, "stream closed inside response head");
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    async fn read_to_end(stream: &mut DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(TIMEOUT, stream.read_to_end(&mut out))
            .await
            .expect("downloader never saw EOF")
            .unwrap();
        out
    }

    fn start(
        registry: &TransferRegistry,
        uploader: &Connection,
        capacity: usize,
        idle_window: usize,
    ) -> (crate::relay::registry::TransferHandle, JoinHandle<()>) {
        let (handle, rx) = registry.create("/file.bin", uploader.id());
        let transfer = Transfer::new(handle.key(), capacity, idle_window);
        let worker = TransferWorker::new(transfer, rx, registry.clone(), "test").spawn();
        (handle, worker)
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut transfer = Transfer::new("/relays/0/a", 8, 3);

        assert_eq!(transfer.room(false), 3);
        assert_eq!(transfer.fill(b"abcdef", false), 3);
        assert_eq!(transfer.room(false), 0);

        assert_eq!(transfer.room(true), 5);
        assert_eq!(transfer.fill(b"defghijkl", true), 5);
        assert_eq!(transfer.buffered(), 8);
        assert_eq!(transfer.room(true), 0);
        assert_eq!(transfer.fill(b"x", true), 0);
        assert_eq!(transfer.pending(), b"abcdefgh");
    }

    #[test]
    fn completion_follows_declared_length() {
        let mut transfer = Transfer::new("/relays/0/a", 16, 16);
        transfer.set_expected_length(10);
        transfer.fill(b"0123456789", true);

        transfer.consume(4);
        assert_eq!(transfer.pending(), b"456789");
        assert!(!transfer.is_complete());

        transfer.consume(6);
        assert!(transfer.is_drained());
        assert!(transfer.is_complete());
        assert_eq!(transfer.total_forwarded(), 10);

        transfer.reset();
        assert_eq!(transfer.total_forwarded(), 0);
    }

    #[test]
    fn zero_length_never_completes() {
        let mut transfer = Transfer::new("/relays/0/a", 16, 16);
        transfer.fill(b"abc", true);
        transfer.consume(3);
        assert_eq!(transfer.expected_length(), None);
        assert!(!transfer.is_complete());
    }

    #[tokio::test]
    async fn relays_declared_length_and_signals_done() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (mut up_client, up_server) = tokio::io::duplex(1024);
        let (mut down_client, down_server) = tokio::io::duplex(1024);
        let uploader = Connection::from_stream(up_server);
        let downloader = Connection::from_stream(down_server);

        let (handle, worker) = start(&registry, &uploader, 1024, 16);
        let key = handle.key().to_string();
        handle
            .send(Command::AttachUploader {
                conn: uploader,
                reply: response::continue_100(),
                leftover: Bytes::from_static(b"012"),
                content_length: 10,
            })
            .unwrap();
        assert_eq!(read_head(&mut up_client).await, "HTTP/1.1 100 Continue\r\n\r\n");

        let downloader_id = downloader.id();
        assert!(registry.claim_downloader(&key, downloader_id).is_some());
        handle.send(Command::AttachDownloader { conn: downloader }).unwrap();
        drop(handle);

        let head = read_head(&mut down_client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 10\r\n"));

        up_client.write_all(b"3456789").await.unwrap();
        assert_eq!(read_to_end(&mut down_client).await, b"0123456789");

        let done = read_head(&mut up_client).await;
        assert!(done.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
        assert!(done.contains(&format!("location: {}\r\n", key)));

        tokio::time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
        assert!(registry.find_by_key(&key).is_none());
    }

    #[tokio::test]
    async fn small_buffer_preserves_order_and_drains_on_disconnect() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        // Tiny pipes force partial writes on both sides.
        let (mut up_client, up_server) = tokio::io::duplex(7);
        let (mut down_client, down_server) = tokio::io::duplex(5);
        let uploader = Connection::from_stream(up_server);
        let uploader_id = uploader.id();
        let downloader = Connection::from_stream(down_server);

        let (handle, worker) = start(&registry, &uploader, 8, 4);
        handle
            .send(Command::AttachUploader {
                conn: uploader,
                reply: Bytes::new(),
                leftover: Bytes::new(),
                content_length: 0,
            })
            .unwrap();
        registry.claim_downloader(handle.key(), downloader.id()).unwrap();
        handle.send(Command::AttachDownloader { conn: downloader }).unwrap();

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let writer = {
            let payload = payload.clone();
            tokio::spawn(async move {
                up_client.write_all(&payload).await.unwrap();
                // Hanging up is the only end marker of an unbounded upload.
                drop(up_client);
            })
        };

        let head = read_head(&mut down_client).await;
        assert!(!head.contains("Content-Length"));
        let received = read_to_end(&mut down_client).await;
        writer.await.unwrap();
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);

        // The uploader left, so the transfer waits out its grace period.
        let snapshot = registry.find_by_key(handle.key()).unwrap();
        assert!(snapshot.uploader.is_none());
        assert!(snapshot.downloader.is_none());
        assert!(registry.find_by_connection(uploader_id).is_none());

        let later = Instant::now() + registry.grace_period() + Duration::from_secs(1);
        assert_eq!(registry.evict_stale(later), 1);
        drop(handle);
        tokio::time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn eviction_closes_waiting_downloader() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (_up_client, up_server) = tokio::io::duplex(64);
        let (mut down_client, down_server) = tokio::io::duplex(64);
        let uploader = Connection::from_stream(up_server);
        let uploader_id = uploader.id();
        let downloader = Connection::from_stream(down_server);

        let (handle, worker) = start(&registry, &uploader, 64, 16);
        drop(uploader);
        registry.release(uploader_id);

        registry.claim_downloader(handle.key(), downloader.id()).unwrap();
        handle.send(Command::AttachDownloader { conn: downloader }).unwrap();
        drop(handle);
        let head = read_head(&mut down_client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK"));

        let later = Instant::now() + registry.grace_period() + Duration::from_secs(1);
        assert_eq!(registry.evict_stale(later), 1);

        assert!(read_to_end(&mut down_client).await.is_empty());
        tokio::time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn downloader_leaving_keeps_buffered_bytes() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (mut up_client, up_server) = tokio::io::duplex(64);
        let uploader = Connection::from_stream(up_server);
        let (handle, _worker) = start(&registry, &uploader, 64, 64);
        let key = handle.key().to_string();
        handle
            .send(Command::AttachUploader {
                conn: uploader,
                reply: Bytes::new(),
                leftover: Bytes::new(),
                content_length: 0,
            })
            .unwrap();

        // First downloader hangs up before anything is sent.
        let (down_client, down_server) = tokio::io::duplex(64);
        let first = Connection::from_stream(down_server);
        let first_id = first.id();
        registry.claim_downloader(&key, first_id).unwrap();
        handle.send(Command::AttachDownloader { conn: first }).unwrap();
        drop(down_client);

        tokio::time::timeout(TIMEOUT, async {
            while registry.find_by_key(&key).unwrap().downloader.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("downloader role never released");

        up_client.write_all(b"kept").await.unwrap();

        let (mut second_client, second_server) = tokio::io::duplex(64);
        let second = Connection::from_stream(second_server);
        registry.claim_downloader(&key, second.id()).unwrap();
        handle.send(Command::AttachDownloader { conn: second }).unwrap();
        read_head(&mut second_client).await;

        drop(up_client);
        assert_eq!(read_to_end(&mut second_client).await, b"kept");
        assert!(registry.find_by_connection(first_id).is_none());
    }

    async fn wait_uploader_released(registry: &TransferRegistry, key: &str) {
        tokio::time::timeout(TIMEOUT, async {
            while registry.find_by_key(key).is_some_and(|snapshot| snapshot.uploader.is_some()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("uploader role never released");
    }

    #[tokio::test]
    async fn uploader_hang_up_seen_past_idle_window() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (mut up_client, up_server) = tokio::io::duplex(4096);
        let uploader = Connection::from_stream(up_server);
        let (handle, _worker) = start(&registry, &uploader, 64, 16);
        let key = handle.key().to_string();

        // Early body bytes alone overflow the no-downloader window.
        handle
            .send(Command::AttachUploader {
                conn: uploader,
                reply: Bytes::new(),
                leftover: Bytes::from(vec![b'a'; 40]),
                content_length: 0,
            })
            .unwrap();
        up_client.write_all(&[b'b'; 30]).await.unwrap();
        drop(up_client);

        wait_uploader_released(&registry, &key).await;
        assert!(registry.find_by_key(&key).unwrap().uploader_left_at.is_some());
        assert!(registry.claim_uploader(&key, crate::net::ConnectionId::new()).is_some());
    }

    #[tokio::test]
    async fn downloader_after_eviction_gets_not_found() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (_up_client, up_server) = tokio::io::duplex(64);
        let (mut down_client, down_server) = tokio::io::duplex(256);
        let uploader = Connection::from_stream(up_server);
        let uploader_id = uploader.id();
        let downloader = Connection::from_stream(down_server);

        let (handle, worker) = start(&registry, &uploader, 64, 16);
        drop(uploader);
        registry.release(uploader_id);
        let claimed = registry.claim_downloader(handle.key(), downloader.id()).unwrap();
        drop(handle);

        // Eviction lands between the claim and delivery to the worker.
        let later = Instant::now() + registry.grace_period() + Duration::from_secs(1);
        assert_eq!(registry.evict_stale(later), 1);
        claimed.send(Command::AttachDownloader { conn: downloader }).unwrap();
        drop(claimed);

        let response = String::from_utf8(read_to_end(&mut down_client).await).unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        tokio::time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn continuation_completes_when_length_already_forwarded() {
        let registry = TransferRegistry::new(&RelaySettings::default());
        let (mut up_client, up_server) = tokio::io::duplex(64);
        let (mut down_client, down_server) = tokio::io::duplex(64);
        let uploader = Connection::from_stream(up_server);
        let downloader = Connection::from_stream(down_server);

        let (handle, worker) = start(&registry, &uploader, 64, 64);
        let key = handle.key().to_string();
        handle
            .send(Command::AttachUploader {
                conn: uploader,
                reply: Bytes::new(),
                leftover: Bytes::new(),
                content_length: 0,
            })
            .unwrap();
        registry.claim_downloader(&key, downloader.id()).unwrap();
        handle.send(Command::AttachDownloader { conn: downloader }).unwrap();
        read_head(&mut down_client).await;

        up_client.write_all(b"0123456789").await.unwrap();
        drop(up_client);
        assert_eq!(read_to_end(&mut down_client).await, b"0123456789");
        wait_uploader_released(&registry, &key).await;

        let (mut next_client, next_server) = tokio::io::duplex(256);
        let next = Connection::from_stream(next_server);
        registry.claim_uploader(&key, next.id()).unwrap();
        handle
            .send(Command::AttachUploader {
                conn: next,
                reply: response::continue_100(),
                leftover: Bytes::new(),
                content_length: 10,
            })
            .unwrap();

        assert_eq!(read_head(&mut next_client).await, "HTTP/1.1 100 Continue\r\n\r\n");
        let done = read_head(&mut next_client).await;
        assert!(done.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
        tokio::time::timeout(TIMEOUT, worker).await.unwrap().unwrap();
        assert!(registry.find_by_key(&key).is_none());
    }
}
