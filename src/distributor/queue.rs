//! Per-bucket FIFO queues of accepted connections.
//!
//! # Responsibilities
//! - Hold connections that were accepted but not yet handed off
//! - Keep one queue per worker ordinal
//! - Rebuild every queue when the worker count changes (relocation)
//! - Close everything on teardown

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::distributor::hash::bucket_for;
use crate::distributor::Routable;

/// The bucket queue set.
///
/// The number of queues always equals the current worker count. Queues are
/// reallocated on relocation, never resized in place.
#[derive(Debug)]
pub struct BucketQueues<C> {
    buckets: Vec<VecDeque<C>>,
}

impl<C> Default for BucketQueues<C> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }
}

impl<C: Routable> BucketQueues<C> {
    /// Create an empty set with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of queued connections across all buckets.
    pub fn queued(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    /// Number of connections queued in `bucket`.
    pub fn depth(&self, bucket: usize) -> usize {
        self.buckets.get(bucket).map_or(0, VecDeque::len)
    }

    /// Iterate over the connections of `bucket` from head to tail.
    pub fn iter_bucket(&self, bucket: usize) -> impl Iterator<Item = &C> + '_ {
        self.buckets.get(bucket).into_iter().flatten()
    }

    /// Hash `conn` and append it to its bucket.
    ///
    /// Returns the bucket index, or gives the connection back when there are
    /// no buckets to route to.
    pub fn enqueue(&mut self, conn: C) -> Result<usize, C> {
        let Some(count) = NonZeroUsize::new(self.buckets.len()) else {
            return Err(conn);
        };
        let bucket = bucket_for(conn.peer_ip(), count);
        self.buckets[bucket].push_back(conn);
        Ok(bucket)
    }

    /// Append `conn` to the tail of `bucket` without rehashing.
    ///
    /// Used for rejected handoffs, which stay with the same worker.
    pub fn requeue(&mut self, bucket: usize, conn: C) -> Result<(), C> {
        match self.buckets.get_mut(bucket) {
            Some(queue) => {
                queue.push_back(conn);
                Ok(())
            }
            None => Err(conn),
        }
    }

    /// Put `conn` back at the head of `bucket`.
    pub fn restore(&mut self, bucket: usize, conn: C) -> Result<(), C> {
        match self.buckets.get_mut(bucket) {
            Some(queue) => {
                queue.push_front(conn);
                Ok(())
            }
            None => Err(conn),
        }
    }

    /// Take the head connection of `bucket`.
    pub fn pop_front(&mut self, bucket: usize) -> Option<C> {
        self.buckets.get_mut(bucket)?.pop_front()
    }

    /// Rehash every queued connection against `workers` buckets.
    ///
    /// Old buckets are drained in index order, each from head to tail, so
    /// connections that land in the same new bucket keep their relative order.
    pub fn relocate(&mut self, workers: NonZeroUsize) {
        let old = std::mem::take(&mut self.buckets);
        let mut buckets: Vec<VecDeque<C>> = (0..workers.get()).map(|_| VecDeque::new()).collect();

        for conn in old.into_iter().flatten() {
            let bucket = bucket_for(conn.peer_ip(), workers);
            buckets[bucket].push_back(conn);
        }

        self.buckets = buckets;
    }

    /// Close every queued connection and remove all buckets.
    ///
    /// Returns how many connections were closed.
    pub fn drain_all(&mut self) -> usize {
        let old = std::mem::take(&mut self.buckets);
        let mut closed = 0;
        for conn in old.into_iter().flatten() {
            drop(conn);
            closed += 1;
        }
        closed
    }
}
