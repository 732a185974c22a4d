//! Shared listening socket.
//!
//! # Responsibilities
//! - Bind an address/port, or adopt an inherited listening fd
//! - Accept connections, bounded by `max_pending` permits
//! - Back off after consecutive accept errors (fd exhaustion and the like)
//! - Report the bound socket name or the platform error
//! - Close idempotently; events from a closed binding are recognizable
//!   by their generation and ignored

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::net::connection::Connection;

/// Where the listener comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    /// Bind and listen on `address:port`. Port 0 picks an ephemeral port.
    Address { address: String, port: u16 },
    /// Adopt an already listening socket.
    Fd(i32),
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Address { address, port } => write!(f, "{}:{}", address, port),
            BindTarget::Fd(fd) => write!(f, "fd:{}", fd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

/// Name of the bound socket, reported to workers waiting on the bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SockName {
    pub address: String,
    pub port: u16,
    pub family: AddressFamily,
}

impl SockName {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        format!("{}", self).parse().ok()
    }
}

impl From<SocketAddr> for SockName {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
            family: if addr.is_ipv4() {
                AddressFamily::IPv4
            } else {
                AddressFamily::IPv6
            },
        }
    }
}

impl fmt::Display for SockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::IPv4 => write!(f, "{}:{}", self.address, self.port),
            AddressFamily::IPv6 => write!(f, "[{}]:{}", self.address, self.port),
        }
    }
}

/// Binding the shared listener failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// Platform error; `code` is the raw errno when the OS gave one.
    #[error("failed to bind {target}: {message}")]
    Io {
        target: String,
        kind: std::io::ErrorKind,
        code: Option<i32>,
        message: String,
    },

    /// The bind was abandoned because the last worker went away.
    #[error("listener binding cancelled")]
    Cancelled,
}

impl BindError {
    fn io(target: &BindTarget, err: &std::io::Error) -> Self {
        BindError::Io {
            target: target.to_string(),
            kind: err.kind(),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    /// Errno-equivalent code, when known.
    pub fn code(&self) -> Option<i32> {
        match self {
            BindError::Io { code, .. } => *code,
            BindError::Cancelled => None,
        }
    }

    pub fn kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            BindError::Io { kind, .. } => Some(*kind),
            BindError::Cancelled => None,
        }
    }
}

/// Error type for accept operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The permit semaphore was closed.
    Closed,
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bounded TCP listener.
///
/// At most `max_pending` accepted connections may be alive at once; accept
/// waits for a permit before taking the next connection off the backlog.
/// This is the listener-wide ceiling. The distributor splits the same budget
/// between workers and closes arrivals for a worker that is at its share.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_pending: usize,
}

impl Listener {
    /// Bind `target`.
    pub async fn bind(target: &BindTarget, max_pending: usize) -> Result<Self, BindError> {
        let inner = match target {
            BindTarget::Address { address, port } => TcpListener::bind((address.as_str(), *port))
                .await
                .map_err(|e| BindError::io(target, &e))?,
            BindTarget::Fd(fd) => adopt_fd(*fd).map_err(|e| BindError::io(target, &e))?,
        };

        let local_addr = inner.local_addr().map_err(|e| BindError::io(target, &e))?;
        tracing::info!(
            address = %local_addr,
            max_pending,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_pending)),
            max_pending,
        })
    }

    /// Accept a new connection, waiting for a free permit first.
    pub async fn accept(&self) -> Result<Connection, ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Connection::new(stream, peer, ConnectionPermit { _permit: permit }).map_err(ListenerError::Accept)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

#[cfg(unix)]
fn adopt_fd(fd: i32) -> std::io::Result<TcpListener> {
    use std::os::fd::BorrowedFd;

    // SAFETY: the host process hands us an open listening socket and keeps it
    // open for the distributor's lifetime. We only duplicate it, so closing
    // the listener leaves the original fd usable for the next bind.
    let owned = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned()?;
    let std_listener = std::net::TcpListener::from(owned);
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

#[cfg(not(unix))]
fn adopt_fd(_fd: i32) -> std::io::Result<TcpListener> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "inheriting a listening fd is only supported on unix",
    ))
}

/// A slot in the pending-connection budget, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Event sent by the listener task to its owner.
#[derive(Debug)]
pub enum ListenerEvent {
    Bound {
        generation: u64,
        result: Result<SockName, BindError>,
    },
    Accepted {
        generation: u64,
        conn: Connection,
    },
}

enum BindingState {
    Unbound,
    Binding { task: JoinHandle<()> },
    Bound { sockname: SockName, task: JoinHandle<()> },
}

/// The distributor's single listener binding.
///
/// Binding and accepting run in a background task that reports through
/// [`ListenerEvent`]s. Each bind attempt gets a new generation; events from an
/// older generation belong to a closed binding.
pub struct ListenerBinding {
    target: BindTarget,
    max_pending: usize,
    generation: u64,
    state: BindingState,
}

impl ListenerBinding {
    pub fn new(target: BindTarget, max_pending: usize) -> Self {
        Self {
            target,
            max_pending,
            generation: 0,
            state: BindingState::Unbound,
        }
    }

    pub fn target(&self) -> &BindTarget {
        &self.target
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, BindingState::Bound { .. })
    }

    pub fn is_binding(&self) -> bool {
        matches!(self.state, BindingState::Binding { .. })
    }

    pub fn sockname(&self) -> Option<&SockName> {
        match &self.state {
            BindingState::Bound { sockname, .. } => Some(sockname),
            _ => None,
        }
    }

    /// Start binding unless a binding exists or is in progress.
    ///
    /// Returns `true` if a new attempt was started.
    pub fn bind(&mut self, events: mpsc::UnboundedSender<ListenerEvent>) -> bool {
        if !matches!(self.state, BindingState::Unbound) {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let target = self.target.clone();
        let max_pending = self.max_pending;

        tracing::debug!(bind_target = %target, generation, "Binding listener");
        let task = tokio::spawn(async move {
            let listener = match Listener::bind(&target, max_pending).await {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = events.send(ListenerEvent::Bound { generation, result: Err(e) });
                    return;
                }
            };
            let sockname = match listener.local_addr() {
                Ok(addr) => SockName::from(addr),
                Err(e) => {
                    let result = Err(BindError::io(&target, &e));
                    let _ = events.send(ListenerEvent::Bound { generation, result });
                    return;
                }
            };
            if events.send(ListenerEvent::Bound { generation, result: Ok(sockname) }).is_err() {
                return;
            }

            accept_loop(listener, generation, events).await;
        });

        self.state = BindingState::Binding { task };
        true
    }

    /// Apply a bind result from the listener task.
    ///
    /// Returns the result if it belongs to the current attempt; `None` for a
    /// stale event.
    pub fn complete(
        &mut self,
        generation: u64,
        result: Result<SockName, BindError>,
    ) -> Option<Result<SockName, BindError>> {
        if generation != self.generation {
            return None;
        }
        match std::mem::replace(&mut self.state, BindingState::Unbound) {
            BindingState::Binding { task } => {
                match &result {
                    Ok(sockname) => {
                        self.state = BindingState::Bound {
                            sockname: sockname.clone(),
                            task,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(bind_target = %self.target, error = %e, "Listener bind failed");
                    }
                }
                Some(result)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Whether an accepted connection from `generation` should be routed.
    pub fn accepts(&self, generation: u64) -> bool {
        generation == self.generation && self.is_bound()
    }

    /// Stop accepting and release the socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.state, BindingState::Unbound) {
            BindingState::Unbound => {}
            BindingState::Binding { task } | BindingState::Bound { task, .. } => {
                task.abort();
                self.generation += 1;
                tracing::info!(bind_target = %self.target, "Listener closed");
            }
        }
    }
}

impl Drop for ListenerBinding {
    fn drop(&mut self) {
        self.close();
    }
}

const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1_000;

/// Capped exponential delay between failing accepts.
#[derive(Debug, Default)]
struct AcceptBackoff {
    failures: u32,
}

impl AcceptBackoff {
    /// Record a failure and return how long to wait before the next accept.
    fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exponential = 2u64.saturating_pow(self.failures - 1);
        let delay_ms = ACCEPT_BACKOFF_BASE_MS.saturating_mul(exponential).min(ACCEPT_BACKOFF_MAX_MS);
        Duration::from_millis(delay_ms)
    }

    fn succeeded(&mut self) {
        self.failures = 0;
    }
}

async fn accept_loop(listener: Listener, generation: u64, events: mpsc::UnboundedSender<ListenerEvent>) {
    let mut backoff = AcceptBackoff::default();
    loop {
        match listener.accept().await {
            Ok(conn) => {
                backoff.succeeded();
                if events.send(ListenerEvent::Accepted { generation, conn }).is_err() {
                    break;
                }
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                let delay = backoff.failed();
                tracing::warn!(
                    error = %e,
                    failures = backoff.failures,
                    delay_ms = delay.as_millis() as u64,
                    "Accept failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> BindTarget {
        BindTarget::Address {
            address: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    #[test]
    fn sockname_from_socket_addr() {
        let v4 = SockName::from("127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(v4.family, AddressFamily::IPv4);
        assert_eq!(v4.to_string(), "127.0.0.1:8080");

        let v6 = SockName::from("[::1]:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(v6.family, AddressFamily::IPv6);
        assert_eq!(v6.socket_addr(), Some("[::1]:9000".parse().unwrap()));

        let json = serde_json::to_value(&v4).unwrap();
        assert_eq!(json, serde_json::json!({ "address": "127.0.0.1", "port": 8080, "family": "IPv4" }));
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let target = BindTarget::Address {
            address: "127.0.0.1".to_string(),
            port,
        };

        let err = Listener::bind(&target, 4).await.err().unwrap();
        assert_eq!(err.kind(), Some(std::io::ErrorKind::AddrInUse));
        assert!(err.code().is_some());
    }

    #[tokio::test]
    async fn permits_bound_pending_connections() {
        let listener = Listener::bind(&loopback(), 1).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = tokio::net::TcpStream::connect(addr).await.unwrap();
        let first = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        let _c2 = tokio::net::TcpStream::connect(addr).await.unwrap();
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err());

        drop(first);
        assert_eq!(listener.available_permits(), 1);
        let second = listener.accept().await.unwrap();
        assert_eq!(second.peer_addr().ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn accept_backoff_grows_caps_and_resets() {
        let mut backoff = AcceptBackoff::default();
        assert_eq!(backoff.failed(), Duration::from_millis(5));
        assert_eq!(backoff.failed(), Duration::from_millis(10));
        assert_eq!(backoff.failed(), Duration::from_millis(20));

        for _ in 0..100 {
            backoff.failed();
        }
        assert_eq!(backoff.failed(), Duration::from_millis(ACCEPT_BACKOFF_MAX_MS));

        backoff.failures = u32::MAX;
        assert_eq!(backoff.failed(), Duration::from_millis(ACCEPT_BACKOFF_MAX_MS));

        backoff.succeeded();
        assert_eq!(backoff.failed(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn binding_lifecycle_ignores_stale_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut binding = ListenerBinding::new(loopback(), 8);

        assert!(binding.bind(tx.clone()));
        assert!(binding.is_binding());
        assert!(!binding.bind(tx.clone()));

        let Some(ListenerEvent::Bound { generation, result }) = rx.recv().await else {
            panic!("expected bind result");
        };
        let sockname = binding.complete(generation, result).unwrap().unwrap();
        assert!(binding.is_bound());
        assert_ne!(sockname.port, 0);
        assert!(binding.accepts(generation));

        binding.close();
        binding.close();
        assert!(!binding.is_bound());
        assert!(!binding.accepts(generation));
        assert!(binding.complete(generation, Ok(sockname)).is_none());
    }
}
