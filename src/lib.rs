//! Hash-affinity connection distributor.
//!
//! Accepts TCP connections on one shared listener and hands each to a worker
//! chosen by hashing the peer IP, so a given client keeps landing on the same
//! worker while the pool is unchanged.

// Core
pub mod distributor;
pub mod protocol;
pub mod service;

// I/O
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::DistributorConfig;
pub use distributor::{bucket_for, hash_address, HandoffToken, WorkerId};
pub use lifecycle::Shutdown;
pub use net::{BindError, SockName};
pub use protocol::{Ack, NewConn};
pub use service::{AckPromise, Distributor, DistributorError, DistributorHandle, Handoff};
