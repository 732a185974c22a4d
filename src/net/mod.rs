//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! First worker registered
//!     → listener.rs (bind address:port or adopt fd, in a background task)
//!     → ListenerEvent::Bound (socket name or platform error)
//!
//! Incoming TCP connection
//!     → listener.rs (wait for a pending permit, accept)
//!     → connection.rs (own the socket, record peer IP)
//!     → ListenerEvent::Accepted → distributor
//!
//! Last worker removed
//!     → listener.rs close (abort task, drop socket)
//! ```
//!
//! # Design Decisions
//! - Bounded pending budget: accept pauses when `max_pending` connections
//!   are queued or awaiting a worker's answer. Each worker gets an even share
//!   of that budget in the distributor, so one stuck worker cannot exhaust it
//! - Accept errors back off exponentially instead of spinning
//! - The listener never talks to workers; every connection goes through the
//!   distributor exactly once

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId};
pub use listener::{AddressFamily, BindError, BindTarget, ListenerBinding, ListenerEvent, SockName};
