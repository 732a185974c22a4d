//! Handoff coordination.
//!
//! # State machine (per worker)
//! ```text
//!            attempt_handoff (queue non-empty)
//!     Idle ─────────────────────────────────────▶ AwaitingAck
//!      ▲                                              │
//!      └──────────── on_reply (accept | reject) ◀─────┘
//! ```
//!
//! Every reply is followed by another `attempt_handoff` for the same worker,
//! so a worker drains its bucket one connection at a time. A rejected
//! connection goes to the tail of the same bucket; it is never offered to a
//! different worker unless the pool is resized.

use std::fmt;

use crate::distributor::worker::{WorkerId, WorkerTransport};
use crate::distributor::{Dispatcher, Routable};
use crate::observability::metrics;
use crate::protocol::{Ack, NewConn};

/// Correlates a worker's reply with the handoff it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct HandoffToken(pub u64);

impl fmt::Display for HandoffToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handoff-{}", self.0)
    }
}

/// Result of `attempt_handoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffAttempt {
    /// A connection was sent and the worker is now awaiting ack.
    Sent(HandoffToken),
    /// The worker already has a handoff in flight.
    Busy,
    /// Nothing queued for the worker.
    Empty,
    /// The worker is not registered.
    Unknown,
    /// The transport refused the connection; it is back at the queue head.
    SendFailed,
}

/// Result of `on_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The worker took the connection; the local handle was released.
    Accepted { next: HandoffAttempt },
    /// The connection was requeued at the tail of the worker's bucket.
    Rejected { next: HandoffAttempt },
    /// The worker is gone or the token is stale; nothing changed.
    Discarded,
}

impl<C: Routable, T: WorkerTransport<C>> Dispatcher<C, T> {
    /// Hand the head of `id`'s bucket to `id`, unless it is busy or idle
    /// with nothing queued.
    pub fn attempt_handoff(&mut self, id: WorkerId) -> HandoffAttempt {
        let Some(bucket) = self.registry.position(id) else {
            return HandoffAttempt::Unknown;
        };
        let Some(worker) = self.registry.get_mut(bucket) else {
            return HandoffAttempt::Unknown;
        };
        if !worker.is_idle() {
            return HandoffAttempt::Busy;
        }
        let Some(conn) = self.queues.pop_front(bucket) else {
            return HandoffAttempt::Empty;
        };

        let token = HandoffToken(self.next_token);
        self.next_token += 1;

        let message = NewConn::new(self.key.as_str());
        let attempt = match worker.transport.send(&message, token, &conn) {
            Ok(()) => {
                tracing::debug!(
                    worker = %id,
                    bucket,
                    token = %token,
                    peer = conn.peer_ip(),
                    "Handoff sent"
                );
                worker.begin_handoff(token, conn);
                metrics::record_handoff("sent");
                HandoffAttempt::Sent(token)
            }
            Err(e) => {
                tracing::warn!(worker = %id, bucket, error = %e, "Handoff send failed, connection kept at queue head");
                if let Err(conn) = self.queues.restore(bucket, conn) {
                    // Buckets always match the registry; only reachable on a bug.
                    tracing::error!(worker = %id, bucket, peer = conn.peer_ip(), "No bucket to restore connection into");
                }
                metrics::record_handoff("send_failed");
                HandoffAttempt::SendFailed
            }
        };
        self.record_pool();
        attempt
    }

    /// Offer a handoff to every worker. Busy and empty workers are skipped.
    pub fn offer_all(&mut self) {
        for id in self.registry.ids() {
            self.attempt_handoff(id);
        }
    }

    /// Apply a worker's reply to the handoff identified by `token`.
    pub fn on_reply(&mut self, id: WorkerId, token: HandoffToken, ack: Ack) -> ReplyOutcome {
        let Some(bucket) = self.registry.position(id) else {
            tracing::debug!(worker = %id, token = %token, "Reply from unregistered worker discarded");
            metrics::record_handoff("discarded");
            return ReplyOutcome::Discarded;
        };
        let conn = match self.registry.get_mut(bucket).and_then(|w| w.complete_handoff(token)) {
            Some(conn) => conn,
            None => {
                tracing::debug!(worker = %id, token = %token, "Stale reply discarded");
                metrics::record_handoff("discarded");
                return ReplyOutcome::Discarded;
            }
        };

        if ack.accepted {
            tracing::debug!(worker = %id, token = %token, "Handoff accepted");
            metrics::record_handoff("accepted");
            drop(conn);
            let next = self.attempt_handoff(id);
            self.record_pool();
            ReplyOutcome::Accepted { next }
        } else {
            tracing::debug!(worker = %id, token = %token, bucket, "Handoff rejected, requeued at tail");
            metrics::record_handoff("rejected");
            if let Err(conn) = self.queues.requeue(bucket, conn) {
                tracing::error!(worker = %id, bucket, peer = conn.peer_ip(), "No bucket to requeue connection into");
            }
            let next = self.attempt_handoff(id);
            self.record_pool();
            ReplyOutcome::Rejected { next }
        }
    }
}
