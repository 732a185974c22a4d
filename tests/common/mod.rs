//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hash_distributor::config::DistributorConfig;
use hash_distributor::service::{Distributor, DistributorHandle, Handoff};
use hash_distributor::Shutdown;

pub const KEY: &str = "test-distributor";

/// How long to wait for something that should happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// How long to wait before concluding something did not happen.
pub const QUIET: Duration = Duration::from_millis(150);

/// Config listening on an ephemeral loopback port.
pub fn loopback_config() -> DistributorConfig {
    listening_on(0)
}

pub fn listening_on(port: u16) -> DistributorConfig {
    let mut config = DistributorConfig::default();
    config.key = Some(KEY.to_string());
    config.listener.address = Some("127.0.0.1".to_string());
    config.listener.port = Some(port);
    config.listener.max_pending = 64;
    config
}

/// A distributor running for the duration of a test.
pub struct TestDistributor {
    pub handle: DistributorHandle,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestDistributor {
    pub fn start(config: DistributorConfig) -> Self {
        let shutdown = Shutdown::new();
        let (handle, task) = Distributor::spawn(&config, shutdown.subscribe());
        Self { handle, shutdown, task }
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("distributor did not stop")
            .expect("distributor task panicked");
    }

    /// Wait until `n` connections are queued.
    pub async fn wait_queued(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            loop {
                if self.handle.stats().await.unwrap().queued == n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue never reached expected depth");
    }
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    tokio::time::timeout(WAIT, TcpStream::connect(addr))
        .await
        .expect("connect timed out")
        .expect("connect failed")
}

/// Connect to `addr` from the loopback address `source`.
pub async fn connect_from(source: std::net::IpAddr, addr: SocketAddr) -> TcpStream {
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.bind(SocketAddr::new(source, 0)).unwrap();
    tokio::time::timeout(WAIT, socket.connect(addr))
        .await
        .expect("connect timed out")
        .expect("connect failed")
}

pub async fn next_handoff(rx: &mut mpsc::UnboundedReceiver<Handoff>) -> Handoff {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no handoff arrived")
        .expect("handoff channel closed")
}

/// Assert no handoff arrives within [`QUIET`].
pub async fn assert_no_handoff(rx: &mut mpsc::UnboundedReceiver<Handoff>) {
    if let Ok(Some(handoff)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected handoff of {}", handoff.connection);
    }
}

/// Write `reply` through the worker's duplicate of the socket.
pub async fn serve(handoff: Handoff, reply: &str) {
    let Handoff { stream, ack, .. } = handoff;
    ack.accept();
    let mut stream = TcpStream::from_std(stream).unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut stream, reply.as_bytes()).await.unwrap();
    tokio::io::AsyncWriteExt::shutdown(&mut stream).await.unwrap();
}

/// Read everything the server sends until EOF.
pub async fn read_to_end(client: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    tokio::time::timeout(WAIT, tokio::io::AsyncReadExt::read_to_end(client, &mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    String::from_utf8(buf).unwrap()
}
