//! Worker abstraction.
//!
//! # Responsibilities
//! - Represent a single registered worker
//! - Track the handoff state (Idle/AwaitingAck)
//! - Hold the in-flight connection until the worker replies
//! - Define the transport seam used to pass a connection to the worker

use std::fmt;

use thiserror::Error;

use crate::distributor::handoff::HandoffToken;
use crate::protocol::NewConn;

/// Identity of a worker, chosen by whoever supervises the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Busy state of a worker, without the connection it may be holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffState {
    Idle,
    AwaitingAck,
}

/// Error returned by a transport that could not pass a connection on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The worker end of the transport is gone.
    #[error("worker transport closed")]
    Closed,

    /// Duplicating or sending the connection handle failed.
    #[error("failed to pass connection handle: {0}")]
    Io(#[from] std::io::Error),
}

/// The channel used to move an accepted connection to a worker.
///
/// `send` only starts the handoff. The worker answers later through the
/// distributor, quoting the `token` it was given.
pub trait WorkerTransport<C>: Send {
    fn send(&mut self, message: &NewConn, token: HandoffToken, conn: &C) -> Result<(), TransportError>;
}

impl<C, T: WorkerTransport<C> + ?Sized> WorkerTransport<C> for Box<T> {
    fn send(&mut self, message: &NewConn, token: HandoffToken, conn: &C) -> Result<(), TransportError> {
        (**self).send(message, token, conn)
    }
}

/// Handoff state including the connection held while awaiting a reply.
#[derive(Debug)]
pub(crate) enum WorkerState<C> {
    Idle,
    AwaitingAck { token: HandoffToken, conn: C },
}

/// A registered worker.
pub struct Worker<C, T> {
    id: WorkerId,
    weight: u32,
    pub(crate) transport: T,
    pub(crate) state: WorkerState<C>,
}

impl<C, T> fmt::Debug for Worker<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C, T> Worker<C, T> {
    /// Create an idle worker.
    pub fn new(id: WorkerId, weight: u32, transport: T) -> Self {
        Self {
            id,
            weight,
            transport,
            state: WorkerState::Idle,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Weight supplied at registration. Recorded only; routing is by hash.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn state(&self) -> HandoffState {
        match self.state {
            WorkerState::Idle => HandoffState::Idle,
            WorkerState::AwaitingAck { .. } => HandoffState::AwaitingAck,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }

    /// Token of the outstanding handoff, if any.
    pub fn in_flight_token(&self) -> Option<HandoffToken> {
        match &self.state {
            WorkerState::AwaitingAck { token, .. } => Some(*token),
            WorkerState::Idle => None,
        }
    }

    /// Enter `AwaitingAck`, holding `conn` until the reply.
    pub(crate) fn begin_handoff(&mut self, token: HandoffToken, conn: C) {
        debug_assert!(self.is_idle(), "{} already has a handoff in flight", self.id);
        self.state = WorkerState::AwaitingAck { token, conn };
    }

    /// Leave `AwaitingAck` if `token` matches the outstanding handoff.
    ///
    /// Returns the held connection, or `None` (state unchanged) for a stale
    /// or unexpected token.
    pub(crate) fn complete_handoff(&mut self, token: HandoffToken) -> Option<C> {
        match std::mem::replace(&mut self.state, WorkerState::Idle) {
            WorkerState::AwaitingAck { token: current, conn } if current == token => Some(conn),
            previous => {
                self.state = previous;
                None
            }
        }
    }
}
