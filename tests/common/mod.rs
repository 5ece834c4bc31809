//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use http_tunnel::config::{TlsConfig, TunnelConfig};
use http_tunnel::pool::frame_codec;
use http_tunnel::{Shutdown, TunnelServer};

/// A length-prefixed echo service standing in for the real destination.
pub struct Destination {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl Destination {
    /// TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start an echo destination on an ephemeral port.
pub async fn start_echo_destination() -> Destination {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut frames = FramedRead::new(read, frame_codec(1 << 24));
                while let Some(Ok(frame)) = frames.next().await {
                    if write.write_all(&frame).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    Destination { addr, accepted }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
    }
}

/// Run a tunnel server on an ephemeral port.
pub async fn start_server(mut config: TunnelConfig) -> RunningServer {
    config.listener.bind_address = "127.0.0.1:0".into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(TunnelServer::new(config).run(listener, shutdown.clone()));
    RunningServer { addr, shutdown, task }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Server configuration that terminates TLS with the fixture certificate.
pub fn tls_server_config() -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.listener.tls = Some(TlsConfig {
        cert_path: fixture("server.pem").display().to_string(),
        key_path: fixture("server.key").display().to_string(),
    });
    config
}

/// HTTP client that never routes through an environment proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
