//! Shared helpers for the socket-level integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warpcall_core::Application;
use warpcall_server::{ConcurrencyGuard, Server, ServerConfig};

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub guard: ConcurrencyGuard,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(application: Arc<dyn Application>, max_concurrency: usize) -> Self {
        init_tracing();

        let mut config = ServerConfig::default();
        config.server.listen = "127.0.0.1:0".parse().unwrap();
        config.server.max_concurrency = max_concurrency;

        let server = Server::bind(config, application).await.unwrap();
        let addr = server.local_addr();
        let guard = server.guard().clone();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(rx));

        Self {
            addr,
            guard,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Send `raw` and read until the server closes the connection.
pub async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    response
}

/// Split a raw response into its head and body at the first blank line.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let at = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    (
        String::from_utf8(raw[..at + 2].to_vec()).unwrap(),
        raw[at + 4..].to_vec(),
    )
}

/// Decode a chunked body, requiring the terminal `00\r\n`.
pub fn decode_chunked(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("chunk size line");
        let size = usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16)
            .expect("hex chunk size");
        body = &body[line_end + 2..];
        if size == 0 {
            assert!(body.is_empty(), "bytes after terminal chunk");
            return out;
        }
        out.extend_from_slice(&body[..size]);
        assert_eq!(&body[size..size + 2], b"\r\n");
        body = &body[size + 2..];
    }
}
