//! In-process worker transport.
//!
//! A [`ChannelWorker`] passes each connection to a worker task as a
//! [`Handoff`]: the `newconn` message, a duplicate of the socket handle, and
//! an [`AckPromise`] the worker fulfils with `accept()` or `reject()`.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::distributor::{HandoffToken, TransportError, WorkerId, WorkerTransport};
use crate::net::{Connection, ConnectionId};
use crate::protocol::{Ack, NewConn};
use crate::service::handle::Command;

/// One connection offered to a worker.
#[derive(Debug)]
pub struct Handoff {
    pub message: NewConn,
    /// Duplicate of the accepted socket, non-blocking.
    pub stream: std::net::TcpStream,
    pub peer: SocketAddr,
    pub connection: ConnectionId,
    pub ack: AckPromise,
}

/// The worker's pending answer to a handoff.
///
/// Dropping it unanswered leaves the worker busy until it is removed.
#[derive(Debug)]
pub struct AckPromise {
    worker: WorkerId,
    token: HandoffToken,
    commands: mpsc::UnboundedSender<Command>,
    fulfilled: bool,
}

impl AckPromise {
    pub fn token(&self) -> HandoffToken {
        self.token
    }

    /// Take ownership of the connection.
    pub fn accept(self) {
        self.send(Ack::ACCEPTED);
    }

    /// Refuse the connection; it will be offered again later.
    pub fn reject(self) {
        self.send(Ack::REJECTED);
    }

    pub fn send(mut self, ack: Ack) {
        self.fulfilled = true;
        let reply = Command::Reply {
            worker: self.worker,
            token: self.token,
            ack,
        };
        if self.commands.send(reply).is_err() {
            tracing::debug!(worker = %self.worker, token = %self.token, "Distributor gone, reply dropped");
        }
    }
}

impl Drop for AckPromise {
    fn drop(&mut self) {
        if !self.fulfilled {
            tracing::warn!(
                worker = %self.worker,
                token = %self.token,
                "Handoff dropped without a reply; worker stays busy until removed"
            );
        }
    }
}

/// Transport to a worker task over an unbounded channel.
#[derive(Debug)]
pub struct ChannelWorker {
    worker: WorkerId,
    handoffs: mpsc::UnboundedSender<Handoff>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelWorker {
    pub(crate) fn new(
        worker: WorkerId,
        commands: mpsc::UnboundedSender<Command>,
    ) -> (Self, mpsc::UnboundedReceiver<Handoff>) {
        let (handoffs, rx) = mpsc::unbounded_channel();
        (
            Self {
                worker,
                handoffs,
                commands,
            },
            rx,
        )
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl WorkerTransport<Connection> for ChannelWorker {
    fn send(&mut self, message: &NewConn, token: HandoffToken, conn: &Connection) -> Result<(), TransportError> {
        let handoff = Handoff {
            message: message.clone(),
            stream: conn.duplicate_stream()?,
            peer: conn.peer_addr(),
            connection: conn.id(),
            ack: AckPromise {
                worker: self.worker,
                token,
                commands: self.commands.clone(),
                fulfilled: false,
            },
        };

        self.handoffs.send(handoff).map_err(|err| {
            let mut handoff = err.0;
            handoff.ack.fulfilled = true;
            TransportError::Closed
        })
    }
}
