//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;

use hailing_frequency::config::RelaySettings;
use hailing_frequency::http::InfoPage;
use hailing_frequency::net::Listener;
use hailing_frequency::Dispatcher;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a relay on an ephemeral localhost port.
pub async fn start_relay(settings: RelaySettings) -> (SocketAddr, Dispatcher) {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_listener(tcp, 64).unwrap();

    let dispatcher = Dispatcher::new(settings, InfoPage::builtin());
    let running = dispatcher.clone();
    tokio::spawn(async move {
        let _ = running.run(listener, std::future::pending()).await;
    });

    (addr, dispatcher)
}

/// A response head: status line plus headers, names lowercased.
#[derive(Debug)]
pub struct Head {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl Head {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read one response head byte by byte, leaving the body unread.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Head {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut byte))
            .await
            .expect("timed out reading response head")
            .unwrap();
        assert!(n > 0, "connection closed mid-head: {:?}", String::from_utf8_lossy(&raw));
        raw.push(byte[0]);
    }

    let text = String::from_utf8(raw).unwrap();
    let mut lines = text.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .expect("malformed status line");
    let headers = lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    Head { status, headers }
}

/// Read exactly `len` body bytes.
pub async fn read_body<S: AsyncRead + Unpin>(stream: &mut S, len: usize) -> Vec<u8> {
    let mut body = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut body))
        .await
        .expect("timed out reading body")
        .unwrap();
    body
}

/// Assert the peer closes the connection without sending anything more.
pub async fn assert_closed<S: AsyncRead + Unpin>(stream: &mut S) {
    let mut rest = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("connection not closed")
        .unwrap();
    assert!(rest.is_empty(), "unexpected trailing bytes: {:?}", String::from_utf8_lossy(&rest));
}

/// Poll `check` until it holds or the I/O timeout passes.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the transfer at `key` has no uploader attached.
pub async fn wait_uploader_released(dispatcher: &Dispatcher, key: &str) {
    wait_for(|| {
        dispatcher
            .registry()
            .find_by_key(key)
            .is_some_and(|snapshot| snapshot.uploader.is_none())
    })
    .await;
}
