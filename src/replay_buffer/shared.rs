use std::sync::{Arc, Mutex, MutexGuard};

use super::{Batch, ExperienceStore, SampleParams};
use crate::error::Result;
use crate::types::Transition;

/// Thread-safe handle to a store.
///
/// Every trait call takes the single lock for its whole duration, so
/// push+evict and sample+priority-update are each atomic. Clones share the
/// same underlying store.
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        SharedStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ExperienceStore> SharedStore<S> {
    pub fn new(store: S) -> Self {
        SharedStore {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the store for a compound operation.
    ///
    /// A poisoned lock is recovered: stores keep no invariant that a panic
    /// half-way through a call could break beyond the panicking call itself.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sample and immediately re-prioritize under one lock
    pub fn sample_and_update<F>(&self, batch_size: usize, params: &SampleParams, priorities: F) -> Result<Batch>
    where
        F: FnOnce(&Batch) -> Vec<f32>,
    {
        let mut store = self.lock();
        let batch = store.sample(batch_size, params)?;
        let new_priorities = priorities(&batch);
        store.update_priorities(batch.indices(), &new_priorities)?;
        Ok(batch)
    }
}

impl<S: ExperienceStore> ExperienceStore for SharedStore<S> {
    fn push(&mut self, transition: Transition) {
        self.lock().push(transition)
    }

    fn sample(&mut self, batch_size: usize, params: &SampleParams) -> Result<Batch> {
        self.lock().sample(batch_size, params)
    }

    fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) -> Result<()> {
        self.lock().update_priorities(indices, priorities)
    }

    fn supports_priorities(&self) -> bool {
        self.lock().supports_priorities()
    }

    fn learn_from_sample<T, F>(&mut self, batch_size: usize, params: &SampleParams, learn: F) -> Result<(Batch, T)>
    where
        F: FnOnce(&Batch) -> Result<(T, Option<Vec<f32>>)>,
    {
        self.lock().learn_from_sample(batch_size, params, learn)
    }

    fn end_episode(&mut self) {
        self.lock().end_episode()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    fn clear(&mut self) {
        self.lock().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay_buffer::{FifoReplayBuffer, PrioritizedConfig};
    use crate::types::Action;
    use ndarray::array;
    use std::thread;

    fn transition(i: usize) -> Transition {
        Transition::new(array![i as f32], Action::Discrete(0), 0.0, array![i as f32], false, false)
    }

    #[test]
    fn test_concurrent_pushes_respect_capacity() {
        let store = SharedStore::new(FifoReplayBuffer::new(50, 0));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let mut store = store.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        store.push(transition(worker * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_sample_and_update() {
        let mut store = SharedStore::new(PrioritizedConfig::default().capacity(8).build().unwrap());
        for i in 0..8 {
            store.push(transition(i));
        }
        let batch = store
            .sample_and_update(4, &SampleParams::default(), |batch| vec![3.0; batch.len()])
            .unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(store.lock().max_priority(), 3.0);
    }
}
