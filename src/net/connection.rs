//! Accepted connections.
//!
//! # Responsibilities
//! - Own the accepted socket until a worker accepts it
//! - Carry the peer IP used for routing
//! - Hold the backpressure permit for as long as the connection is ours
//! - Duplicate the socket handle for passing to a worker

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::distributor::Routable;
use crate::net::listener::ConnectionPermit;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An accepted connection waiting to be handed to a worker.
///
/// Dropping it closes the local socket handle and frees its permit. A worker
/// that received a duplicate of the handle keeps the socket open.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: std::net::TcpStream,
    peer: SocketAddr,
    peer_ip: String,
    _permit: ConnectionPermit,
}

impl Connection {
    /// Take ownership of an accepted stream.
    pub fn new(
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
    ) -> std::io::Result<Self> {
        // Detach from the reactor; the stream stays non-blocking.
        let stream = stream.into_std()?;
        Ok(Self {
            id: ConnectionId::next(),
            stream,
            peer,
            peer_ip: peer.ip().to_string(),
            _permit: permit,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Duplicate the underlying socket handle.
    pub fn duplicate_stream(&self) -> std::io::Result<std::net::TcpStream> {
        self.stream.try_clone()
    }
}

impl Routable for Connection {
    fn peer_ip(&self) -> &str {
        &self.peer_ip
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::trace!(connection_id = %self.id, peer = %self.peer, "Local connection handle closed");
    }
}
