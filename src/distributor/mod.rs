//! Connection distribution core.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → hash.rs (peer IP → u32 → bucket = hash % workers)
//!     → queue.rs (append to bucket FIFO)
//!     → handoff.rs (owner idle? send head, await ack)
//!         - accepted: release local handle, send next
//!         - rejected: requeue at tail, send next
//!
//! Worker added / removed (registry.rs):
//!     → queue.rs relocate: rehash every queued connection
//!     → last worker removed: close every queued connection
//! ```
//!
//! # Design Decisions
//! - `Dispatcher` is synchronous and owns all state; the async service feeds
//!   it one event at a time, so relocation never interleaves with a handoff
//! - A worker's bucket is its registry position, nothing else is stored
//! - Connections already sent to a worker are not touched by relocation
//! - No retry limit on rejection
//! - Each worker's backlog (queued plus in flight) is capped at
//!   `max_pending / workers`; arrivals for a full bucket are closed so a
//!   stuck worker cannot use up the budget of the others

pub mod handoff;
pub mod hash;
pub mod queue;
pub mod registry;
pub mod worker;

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::observability::metrics;

pub use handoff::{HandoffAttempt, HandoffToken, ReplyOutcome};
pub use hash::{bucket_for, hash_address};
pub use queue::BucketQueues;
pub use registry::{RegistryError, WorkerRegistry};
pub use worker::{HandoffState, TransportError, Worker, WorkerId, WorkerTransport};

/// Anything that can be routed by its peer address.
pub trait Routable {
    /// Peer IP address as text, without the port.
    fn peer_ip(&self) -> &str;
}

/// Result of `Dispatcher::enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued in `bucket`; `handoff` tells what the owning worker did with it.
    Queued { bucket: usize, handoff: HandoffAttempt },
    /// No workers registered; the connection was closed.
    Closed,
    /// The owner of `bucket` is at its backlog limit; the connection was closed.
    Overflow { bucket: usize },
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub weight: u32,
    pub bucket: usize,
    pub state: HandoffState,
    pub queued: usize,
}

/// Consistent-hash dispatcher over a pool of workers.
#[derive(Debug)]
pub struct Dispatcher<C, T> {
    key: String,
    registry: WorkerRegistry<C, T>,
    queues: BucketQueues<C>,
    next_token: u64,
    max_pending: usize,
}

impl<C: Routable, T: WorkerTransport<C>> Dispatcher<C, T> {
    /// Create a dispatcher with no workers. `key` is sent with every handoff.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            registry: WorkerRegistry::new(),
            queues: BucketQueues::new(),
            next_token: 1,
            max_pending: usize::MAX,
        }
    }

    /// Bound the connections held for workers, split evenly between them.
    ///
    /// Every worker may hold at least one.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Backlog limit of a single worker at the current pool size.
    pub fn per_worker_limit(&self) -> Option<usize> {
        let workers = NonZeroUsize::new(self.registry.len())?;
        Some((self.max_pending / workers).max(1))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn worker_count(&self) -> usize {
        self.registry.len()
    }

    /// Total connections waiting in bucket queues.
    pub fn queued(&self) -> usize {
        self.queues.queued()
    }

    /// Register a worker and rehash the queues. Returns its bucket.
    ///
    /// The new worker is not offered a handoff here; the caller does that
    /// once the listener is bound.
    pub fn add_worker(&mut self, id: WorkerId, weight: u32, transport: T) -> Result<usize, RegistryError> {
        let bucket = self.registry.add(Worker::new(id, weight, transport))?;
        tracing::info!(worker = %id, bucket, workers = self.registry.len(), "Worker registered");
        self.relocate();
        Ok(bucket)
    }

    /// Unregister a worker.
    ///
    /// Returns `true` when it was the last one: every queued connection has
    /// then been closed. Otherwise the queues are rehashed and `false` is
    /// returned. A handoff in flight to the removed worker is forgotten; its
    /// late reply will be discarded.
    pub fn remove_worker(&mut self, id: WorkerId) -> Result<bool, RegistryError> {
        let worker = self.registry.remove(id)?;
        if let Some(token) = worker.in_flight_token() {
            tracing::debug!(worker = %id, token = %token, "Removed worker had a handoff in flight");
            metrics::record_closed("worker_removed", 1);
        }
        drop(worker);
        tracing::info!(worker = %id, workers = self.registry.len(), "Worker unregistered");

        if self.registry.is_empty() {
            let closed = self.queues.drain_all();
            tracing::info!(closed, "Last worker removed, queued connections closed");
            metrics::record_closed("teardown", closed);
            metrics::record_pool(0, 0);
            return Ok(true);
        }

        self.relocate();
        Ok(false)
    }

    /// Route an accepted connection to its bucket and try to hand it off.
    pub fn enqueue(&mut self, conn: C) -> Enqueued {
        let (Some(workers), Some(limit)) = (NonZeroUsize::new(self.registry.len()), self.per_worker_limit()) else {
            tracing::debug!(peer = conn.peer_ip(), "No workers registered, connection closed");
            metrics::record_closed("late", 1);
            return Enqueued::Closed;
        };

        let bucket = bucket_for(conn.peer_ip(), workers);
        let backlog = self.backlog(bucket);
        if backlog >= limit {
            tracing::debug!(bucket, backlog, limit, peer = conn.peer_ip(), "Worker backlog full, connection closed");
            metrics::record_closed("overflow", 1);
            drop(conn);
            return Enqueued::Overflow { bucket };
        }

        match self.queues.enqueue(conn) {
            Ok(bucket) => {
                let owner = self.registry.get(bucket).map(Worker::id);
                let handoff = match owner {
                    Some(id) => self.attempt_handoff(id),
                    None => HandoffAttempt::Unknown,
                };
                self.record_pool();
                Enqueued::Queued { bucket, handoff }
            }
            Err(conn) => {
                // Buckets always match the registry; only reachable on a bug.
                tracing::error!(peer = conn.peer_ip(), "No bucket for connection, closed");
                metrics::record_closed("late", 1);
                Enqueued::Closed
            }
        }
    }

    /// Connections held for the owner of `bucket`: queued plus in flight.
    pub fn backlog(&self, bucket: usize) -> usize {
        let in_flight = self.registry.get(bucket).map_or(0, |w| usize::from(!w.is_idle()));
        self.queues.depth(bucket) + in_flight
    }

    /// Drop every worker and close every queued connection.
    ///
    /// Returns the number of queued connections closed.
    pub fn shutdown(&mut self) -> usize {
        let workers = self.registry.clear();
        let in_flight = workers.iter().filter(|w| !w.is_idle()).count();
        drop(workers);
        let closed = self.queues.drain_all();
        tracing::info!(closed, in_flight, "Dispatcher shut down");
        metrics::record_closed("teardown", closed);
        metrics::record_pool(0, 0);
        closed
    }

    /// Handoff state of `id`, if registered.
    pub fn state_of(&self, id: WorkerId) -> Option<HandoffState> {
        let bucket = self.registry.position(id)?;
        self.registry.get(bucket).map(Worker::state)
    }

    /// Queue depth of `id`'s bucket, if registered.
    pub fn queue_depth(&self, id: WorkerId) -> Option<usize> {
        self.registry.position(id).map(|bucket| self.queues.depth(bucket))
    }

    /// View of every worker in bucket order.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.registry
            .iter()
            .enumerate()
            .map(|(bucket, worker)| WorkerSnapshot {
                id: worker.id(),
                weight: worker.weight(),
                bucket,
                state: worker.state(),
                queued: self.queues.depth(bucket),
            })
            .collect()
    }

    fn relocate(&mut self) {
        let Some(workers) = NonZeroUsize::new(self.registry.len()) else {
            return;
        };
        self.queues.relocate(workers);
        tracing::debug!(workers = workers.get(), queued = self.queues.queued(), "Queues relocated");
        metrics::record_relocation();
        self.record_pool();
    }

    pub(crate) fn record_pool(&self) {
        metrics::record_pool(self.registry.len(), self.queues.queued());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::protocol::NewConn;

    /// Counts connections closed (dropped).
    #[derive(Debug, Clone, Default)]
    pub struct CloseCounter(Arc<AtomicUsize>);

    impl CloseCounter {
        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug)]
    pub struct TestConn {
        pub id: usize,
        pub ip: String,
        closed: CloseCounter,
    }

    impl TestConn {
        pub fn new(id: usize, ip: &str, closed: &CloseCounter) -> Self {
            Self {
                id,
                ip: ip.to_string(),
                closed: closed.clone(),
            }
        }
    }

    impl Routable for TestConn {
        fn peer_ip(&self) -> &str {
            &self.ip
        }
    }

    impl Drop for TestConn {
        fn drop(&mut self) {
            self.closed.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Transport that records `(token, connection id)` for every send.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<(HandoffToken, usize)>>>,
        pub fail: Arc<AtomicBool>,
    }

    impl RecordingTransport {
        pub fn sent_ids(&self) -> Vec<usize> {
            self.sent.lock().unwrap().iter().map(|(_, id)| *id).collect()
        }

        pub fn last_token(&self) -> HandoffToken {
            self.sent.lock().unwrap().last().unwrap().0
        }
    }

    impl WorkerTransport<TestConn> for RecordingTransport {
        fn send(&mut self, message: &NewConn, token: HandoffToken, conn: &TestConn) -> Result<(), TransportError> {
            assert_eq!(message.key, "test-key");
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push((token, conn.id));
            Ok(())
        }
    }
}
