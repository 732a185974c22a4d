//! Worker registry.
//!
//! # Responsibilities
//! - Keep registered workers in registration order
//! - Derive each worker's bucket index from its position
//! - Reject double registration and unknown removals

use thiserror::Error;

use crate::distributor::worker::{Worker, WorkerId};

/// Registry misuse. Callers treat these as programming errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} is already registered")]
    AlreadyRegistered(WorkerId),

    #[error("{0} is not registered")]
    NotRegistered(WorkerId),
}

/// Ordered collection of workers. A worker's index is its bucket.
#[derive(Debug)]
pub struct WorkerRegistry<C, T> {
    workers: Vec<Worker<C, T>>,
}

impl<C, T> Default for WorkerRegistry<C, T> {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
        }
    }
}

impl<C, T> WorkerRegistry<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Append a worker. Returns its bucket index.
    pub fn add(&mut self, worker: Worker<C, T>) -> Result<usize, RegistryError> {
        if self.position(worker.id()).is_some() {
            return Err(RegistryError::AlreadyRegistered(worker.id()));
        }
        self.workers.push(worker);
        Ok(self.workers.len() - 1)
    }

    /// Remove a worker. Workers after it shift down one bucket.
    pub fn remove(&mut self, id: WorkerId) -> Result<Worker<C, T>, RegistryError> {
        let index = self.position(id).ok_or(RegistryError::NotRegistered(id))?;
        Ok(self.workers.remove(index))
    }

    /// Current bucket index of `id`.
    pub fn position(&self, id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id() == id)
    }

    pub fn get(&self, index: usize) -> Option<&Worker<C, T>> {
        self.workers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Worker<C, T>> {
        self.workers.get_mut(index)
    }

    /// Workers in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &Worker<C, T>> + '_ {
        self.workers.iter()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(Worker::id).collect()
    }

    /// Remove every worker.
    pub fn clear(&mut self) -> Vec<Worker<C, T>> {
        std::mem::take(&mut self.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: u64) -> Worker<(), ()> {
        Worker::new(WorkerId(id), 1, ())
    }

    #[test]
    fn positions_follow_registration_order() {
        let mut registry = WorkerRegistry::new();
        assert_eq!(registry.add(worker(10)), Ok(0));
        assert_eq!(registry.add(worker(20)), Ok(1));
        assert_eq!(registry.add(worker(30)), Ok(2));
        assert_eq!(registry.ids(), vec![WorkerId(10), WorkerId(20), WorkerId(30)]);

        registry.remove(WorkerId(10)).unwrap();
        assert_eq!(registry.position(WorkerId(20)), Some(0));
        assert_eq!(registry.position(WorkerId(30)), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn double_add_is_rejected() {
        let mut registry = WorkerRegistry::new();
        registry.add(worker(1)).unwrap();
        assert_eq!(
            registry.add(worker(1)),
            Err(RegistryError::AlreadyRegistered(WorkerId(1)))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_remove_is_rejected() {
        let mut registry: WorkerRegistry<(), ()> = WorkerRegistry::new();
        assert_eq!(
            registry.remove(WorkerId(4)).unwrap_err(),
            RegistryError::NotRegistered(WorkerId(4))
        );
        assert!(registry.is_empty());
    }
}
