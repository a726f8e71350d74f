use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{check_available, Batch, BatchItems, ExperienceStore, SampleParams};
use crate::error::Result;
use crate::types::Transition;

/// Ring buffer with uniform sampling.
///
/// Draws are without replacement inside a batch and with replacement across
/// calls. Index handles are insertion ids, so a handle never silently points
/// at a newer transition after eviction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FifoReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
    /// Insertion id of the next pushed transition
    next_id: usize,
    rng: ChaCha8Rng,
}

impl FifoReplayBuffer {
    /// Create a buffer. Panics if `capacity` is zero; use
    /// [`FifoConfig::build`](super::FifoConfig::build) for a fallible path.
    pub fn new(capacity: usize, seed: u64) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        FifoReplayBuffer {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Iterate over stored transitions, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    fn first_id(&self) -> usize {
        self.next_id - self.buffer.len()
    }
}

impl ExperienceStore for FifoReplayBuffer {
    fn push(&mut self, transition: Transition) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
        self.next_id += 1;
    }

    fn sample(&mut self, batch_size: usize, _params: &SampleParams) -> Result<Batch> {
        check_available(batch_size, self.buffer.len())?;

        let positions = rand::seq::index::sample(&mut self.rng, self.buffer.len(), batch_size);
        let first_id = self.first_id();
        let mut transitions = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);
        for position in positions.iter() {
            transitions.push(self.buffer[position].clone());
            indices.push(first_id + position);
        }

        Ok(Batch::new(BatchItems::Transitions(transitions), None, indices))
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}
