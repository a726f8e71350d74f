use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sum_tree::{MinTree, SumTree};
use super::{
    check_available, Batch, BatchItems, BetaSchedule, EvictionPolicy, ExperienceStore,
    PrioritizedConfig, SampleParams,
};
use crate::error::{MetisError, Result};
use crate::types::Transition;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    transition: Transition,
    id: u64,
    priority: f32,
}

/// Proportional prioritized replay.
///
/// Item `i` is drawn with probability `(p_i + eps)^alpha / sum_k (p_k + eps)^alpha`.
/// New items enter with the largest priority seen so far. Each sampled item
/// carries the importance weight `(N * P(i))^-beta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrioritizedReplayBuffer {
    slots: Vec<Option<Entry>>,
    /// insertion id -> slot
    slot_of: HashMap<u64, usize>,
    tree: SumTree,
    min_tree: MinTree,
    capacity: usize,
    len: usize,
    /// Next slot for FIFO writes
    cursor: usize,
    next_id: u64,
    alpha: f32,
    epsilon: f32,
    max_priority: f32,
    eviction: EvictionPolicy,
    normalize_weights: bool,
    beta: BetaSchedule,
    rng: ChaCha8Rng,
}

impl PrioritizedReplayBuffer {
    pub fn new(config: &PrioritizedConfig) -> Result<Self> {
        super::check_capacity(config.capacity)?;
        if !(config.alpha >= 0.0) {
            return Err(MetisError::invalid_parameter("alpha", "Alpha must be non-negative"));
        }
        if !(config.epsilon > 0.0) {
            return Err(MetisError::invalid_parameter("epsilon", "Epsilon must be positive"));
        }

        Ok(PrioritizedReplayBuffer {
            slots: vec![None; config.capacity],
            slot_of: HashMap::with_capacity(config.capacity),
            tree: SumTree::new(config.capacity),
            min_tree: MinTree::new(config.capacity),
            capacity: config.capacity,
            len: 0,
            cursor: 0,
            next_id: 0,
            alpha: config.alpha,
            epsilon: config.epsilon,
            max_priority: 1.0,
            eviction: config.eviction,
            normalize_weights: config.normalize_weights,
            beta: config.beta.clone(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        })
    }

    /// Largest priority seen so far
    pub fn max_priority(&self) -> f32 {
        self.max_priority
    }

    /// Current value of the annealed importance-weight exponent
    pub fn beta(&self) -> f32 {
        self.beta.beta()
    }

    fn mass(&self, priority: f32) -> f64 {
        ((priority + self.epsilon) as f64).powf(self.alpha as f64)
    }

    fn write(&mut self, slot: usize, transition: Transition) {
        let id = self.next_id;
        self.next_id += 1;
        let priority = self.max_priority;

        if let Some(old) = self.slots[slot].take() {
            self.slot_of.remove(&old.id);
        } else {
            self.len += 1;
        }

        self.tree.set(slot, self.mass(priority));
        self.min_tree.set(slot, priority, id);
        self.slot_of.insert(id, slot);
        self.slots[slot] = Some(Entry { transition, id, priority });
    }

    /// Slot the next push writes to
    fn target_slot(&self) -> usize {
        if self.len < self.capacity {
            // Until the first eviction slots fill in order, so the cursor
            // always points at a free one.
            return self.cursor;
        }
        match self.eviction {
            EvictionPolicy::Fifo => self.cursor,
            EvictionPolicy::LowestPriority => self.min_tree.argmin().unwrap_or(self.cursor),
        }
    }
}

impl ExperienceStore for PrioritizedReplayBuffer {
    fn push(&mut self, transition: Transition) {
        let slot = self.target_slot();
        self.write(slot, transition);
        if slot == self.cursor {
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    fn sample(&mut self, batch_size: usize, params: &SampleParams) -> Result<Batch> {
        check_available(batch_size, self.len)?;

        let beta = params.beta.unwrap_or_else(|| self.beta.beta());
        let total = self.tree.total();
        let n = self.len as f64;

        let mut transitions = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let mass = self.rng.gen::<f64>() * total;
            let slot = self.tree.find(mass);
            let entry = match &self.slots[slot] {
                Some(entry) => entry,
                None => {
                    return Err(MetisError::InvalidState(format!(
                        "prioritized store sampled empty slot {}",
                        slot
                    )))
                }
            };
            let probability = self.tree.get(slot) / total;
            weights.push((n * probability).powf(-(beta as f64)) as f32);
            transitions.push(entry.transition.clone());
            indices.push(entry.id as usize);
        }

        if self.normalize_weights {
            let max_weight = weights.iter().fold(0.0_f32, |max, &w| max.max(w));
            if max_weight > 0.0 {
                for w in weights.iter_mut() {
                    *w /= max_weight;
                }
            }
        }

        self.beta.advance();

        Ok(Batch::new(BatchItems::Transitions(transitions), Some(weights), indices))
    }

    /// Stale handles (items evicted since sampling) are skipped.
    fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) -> Result<()> {
        if indices.len() != priorities.len() {
            return Err(MetisError::dimension_mismatch(
                format!("{} priorities", indices.len()),
                format!("{} priorities", priorities.len()),
            ));
        }
        if let Some(bad) = priorities.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
            return Err(MetisError::invalid_parameter(
                "priorities",
                format!("priorities must be finite and non-negative, got {}", bad),
            ));
        }

        for (&index, &priority) in indices.iter().zip(priorities.iter()) {
            let slot = match self.slot_of.get(&(index as u64)) {
                Some(&slot) => slot,
                None => continue,
            };
            let mass = self.mass(priority);
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.priority = priority;
                self.tree.set(slot, mass);
                self.min_tree.set(slot, priority, entry.id);
            }
            if priority > self.max_priority {
                self.max_priority = priority;
            }
        }
        Ok(())
    }

    fn supports_priorities(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&mut self) {
        for slot in 0..self.capacity {
            if self.slots[slot].take().is_some() {
                self.tree.set(slot, 0.0);
                self.min_tree.unset(slot);
            }
        }
        self.slot_of.clear();
        self.len = 0;
        self.cursor = 0;
    }
}
