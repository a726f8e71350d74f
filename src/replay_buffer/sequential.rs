use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{check_available, Batch, BatchItems, ExperienceStore, SampleParams, Sequence, SequentialConfig};
use crate::error::{MetisError, Result};
use crate::types::Transition;

/// Ring buffer that samples fixed-length sub-trajectories for sequence
/// models.
///
/// Every stored transition is tagged with the episode it belongs to; a new
/// episode starts after any transition with `terminated || truncated`, and
/// after [`end_episode`](ExperienceStore::end_episode). A
/// sampled sequence begins at a uniformly drawn stored step and runs forward
/// until it has `sequence_length` steps or the episode segment ends, in which
/// case the remainder is padded with `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequentialReplayBuffer {
    buffer: VecDeque<(Transition, u64)>,
    capacity: usize,
    sequence_length: usize,
    next_id: usize,
    episode: u64,
    rng: ChaCha8Rng,
}

impl SequentialReplayBuffer {
    pub fn new(config: &SequentialConfig) -> Result<Self> {
        super::check_capacity(config.capacity)?;
        if config.sequence_length == 0 {
            return Err(MetisError::invalid_parameter(
                "sequence_length",
                "Sequence length must be greater than 0",
            ));
        }
        Ok(SequentialReplayBuffer {
            buffer: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            sequence_length: config.sequence_length,
            next_id: 0,
            episode: 0,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        })
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn sequence_from(&self, start: usize, length: usize) -> Sequence {
        let episode = self.buffer[start].1;
        let mut steps = Vec::with_capacity(length);
        for position in start..(start + length).min(self.buffer.len()) {
            let (transition, tag) = &self.buffer[position];
            if *tag != episode {
                break;
            }
            steps.push(Some(transition.clone()));
        }
        steps.resize(length, None);
        Sequence::new(steps)
    }
}

impl ExperienceStore for SequentialReplayBuffer {
    fn push(&mut self, transition: Transition) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        let done = transition.done();
        self.buffer.push_back((transition, self.episode));
        self.next_id += 1;
        if done {
            self.episode += 1;
        }
    }

    fn sample(&mut self, batch_size: usize, params: &SampleParams) -> Result<Batch> {
        check_available(batch_size, self.buffer.len())?;
        let length = params.sequence_length.unwrap_or(self.sequence_length);
        if length == 0 {
            return Err(MetisError::invalid_parameter(
                "sequence_length",
                "Sequence length must be greater than 0",
            ));
        }

        let starts = rand::seq::index::sample(&mut self.rng, self.buffer.len(), batch_size);
        let first_id = self.next_id - self.buffer.len();
        let mut sequences = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);
        for start in starts.iter() {
            sequences.push(self.sequence_from(start, length));
            indices.push(first_id + start);
        }

        Ok(Batch::new(BatchItems::Sequences(sequences), None, indices))
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&mut self) {
        self.buffer.clear();
        // Whatever follows is a fresh segment
        self.episode += 1;
    }

    fn end_episode(&mut self) {
        self.episode += 1;
    }
}
