//! Registration API.
//!
//! [`DistributorHandle`] is the cloneable front of the distributor actor.
//! Every call becomes a [`Command`] processed in order by the actor.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::distributor::{HandoffToken, RegistryError, WorkerId, WorkerSnapshot, WorkerTransport};
use crate::net::{BindError, Connection, SockName};
use crate::protocol::Ack;
use crate::service::transport::{ChannelWorker, Handoff};

pub(crate) type BoxedTransport = Box<dyn WorkerTransport<Connection>>;

/// Errors returned by the registration API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no listener address, port or fd configured")]
    NoBindTarget,

    #[error("distributor stopped")]
    Stopped,
}

pub(crate) enum Command {
    Add {
        worker: WorkerId,
        weight: u32,
        transport: BoxedTransport,
        reply: oneshot::Sender<Result<BindNotice, DistributorError>>,
    },
    Remove {
        worker: WorkerId,
        reply: oneshot::Sender<Result<bool, DistributorError>>,
    },
    Reply {
        worker: WorkerId,
        token: HandoffToken,
        ack: Ack,
    },
    Stats {
        reply: oneshot::Sender<DistributorStats>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Add { worker, weight, .. } => write!(f, "Add({}, weight {})", worker, weight),
            Command::Remove { worker, .. } => write!(f, "Remove({})", worker),
            Command::Reply { worker, token, ack } => write!(f, "Reply({}, {}, {:?})", worker, token, ack),
            Command::Stats { .. } => write!(f, "Stats"),
        }
    }
}

/// Resolves once the shared listener is bound, or binding failed.
#[derive(Debug)]
pub struct BindNotice {
    rx: oneshot::Receiver<Result<SockName, BindError>>,
}

impl BindNotice {
    pub(crate) fn new(rx: oneshot::Receiver<Result<SockName, BindError>>) -> Self {
        Self { rx }
    }

    /// Wait for the bind outcome.
    pub async fn wait(self) -> Result<SockName, BindError> {
        self.rx.await.unwrap_or(Err(BindError::Cancelled))
    }
}

/// Point-in-time view of the distributor.
#[derive(Debug, Clone, Serialize)]
pub struct DistributorStats {
    pub key: String,
    pub sockname: Option<SockName>,
    pub queued: usize,
    pub workers: Vec<WorkerSnapshot>,
}

/// Handle to a running distributor.
#[derive(Debug, Clone)]
pub struct DistributorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DistributorHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Register a worker.
    ///
    /// The returned notice resolves with the listener's socket name once it
    /// is bound; immediately if it already is. A failed bind leaves the
    /// distributor unbound until the next `add` retries.
    pub async fn add<T>(&self, worker: WorkerId, weight: u32, transport: T) -> Result<BindNotice, DistributorError>
    where
        T: WorkerTransport<Connection> + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Add {
            worker,
            weight,
            transport: Box::new(transport),
            reply,
        })?;
        rx.await.map_err(|_| DistributorError::Stopped)?
    }

    /// Unregister a worker. Returns `true` when no workers remain and the
    /// listener has been released.
    pub async fn remove(&self, worker: WorkerId) -> Result<bool, DistributorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove { worker, reply })?;
        rx.await.map_err(|_| DistributorError::Stopped)?
    }

    /// Deliver a worker's answer to the handoff identified by `token`.
    ///
    /// Custom transports call this; [`ChannelWorker`] does it through
    /// [`AckPromise`](crate::service::AckPromise).
    pub fn reply(&self, worker: WorkerId, token: HandoffToken, ack: Ack) -> Result<(), DistributorError> {
        self.send(Command::Reply { worker, token, ack })
    }

    pub async fn stats(&self) -> Result<DistributorStats, DistributorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| DistributorError::Stopped)
    }

    /// Create an in-process transport for `worker` and the receiving end the
    /// worker task reads handoffs from.
    pub fn channel_worker(&self, worker: WorkerId) -> (ChannelWorker, mpsc::UnboundedReceiver<Handoff>) {
        ChannelWorker::new(worker, self.commands.clone())
    }

    fn send(&self, command: Command) -> Result<(), DistributorError> {
        self.commands.send(command).map_err(|_| DistributorError::Stopped)
    }
}
