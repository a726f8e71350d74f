//! Configuration of the experience stores.
use serde::{Deserialize, Serialize};

use super::{
    Batch, ExperienceStore, FifoReplayBuffer, PrioritizedReplayBuffer, SampleParams,
    SequentialReplayBuffer,
};
use crate::error::Result;
use crate::types::Transition;

/// Which item a full store drops on insertion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Oldest insertion first
    Fifo,
    /// Lowest priority first, ties going to the oldest insertion
    LowestPriority,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Fifo
    }
}

/// Linear annealing of the importance-weight exponent $\beta$.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BetaSchedule {
    /// Initial value of $\beta$.
    pub beta_0: f32,

    /// Final value of $\beta$.
    pub beta_final: f32,

    /// Sample calls until beta reaches its final value.
    pub n_samples_final: usize,

    /// Sample calls so far.
    pub n_samples: usize,
}

impl BetaSchedule {
    pub fn new(beta_0: f32, beta_final: f32, n_samples_final: usize) -> Self {
        Self {
            beta_0,
            beta_final,
            n_samples_final,
            n_samples: 0,
        }
    }

    /// Fixed exponent
    pub fn constant(beta: f32) -> Self {
        Self::new(beta, beta, 0)
    }

    pub fn beta(&self) -> f32 {
        if self.n_samples >= self.n_samples_final {
            self.beta_final
        } else {
            let d = self.beta_final - self.beta_0;
            self.beta_0 + d * (self.n_samples as f32 / self.n_samples_final as f32)
        }
    }

    pub fn advance(&mut self) {
        self.n_samples += 1;
    }
}

impl Default for BetaSchedule {
    fn default() -> Self {
        Self::new(0.4, 1.0, 100_000)
    }
}

/// Configuration of [FifoReplayBuffer].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoConfig {
    pub capacity: usize,
    pub seed: u64,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
        }
    }
}

impl FifoConfig {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> Result<FifoReplayBuffer> {
        super::check_capacity(self.capacity)?;
        Ok(FifoReplayBuffer::new(self.capacity, self.seed))
    }
}

/// Configuration of [PrioritizedReplayBuffer].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizedConfig {
    pub capacity: usize,
    /// Priority exponent; 0 gives uniform sampling
    pub alpha: f32,
    pub beta: BetaSchedule,
    /// Added to every priority so no item has zero probability
    pub epsilon: f32,
    pub eviction: EvictionPolicy,
    /// Divide weights by the batch maximum
    pub normalize_weights: bool,
    pub seed: u64,
}

impl Default for PrioritizedConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            alpha: 0.6,
            beta: BetaSchedule::default(),
            epsilon: 1e-6,
            eviction: EvictionPolicy::Fifo,
            normalize_weights: false,
            seed: 42,
        }
    }
}

impl PrioritizedConfig {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn beta(mut self, beta: BetaSchedule) -> Self {
        self.beta = beta;
        self
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn normalize_weights(mut self, normalize: bool) -> Self {
        self.normalize_weights = normalize;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> Result<PrioritizedReplayBuffer> {
        PrioritizedReplayBuffer::new(self)
    }
}

/// Configuration of [SequentialReplayBuffer].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    pub capacity: usize,
    pub sequence_length: usize,
    pub seed: u64,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            sequence_length: 8,
            seed: 42,
        }
    }
}

impl SequentialConfig {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = length;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> Result<SequentialReplayBuffer> {
        SequentialReplayBuffer::new(self)
    }
}

/// Store selection, tagged by `kind` in config files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayBufferConfig {
    Fifo(FifoConfig),
    Prioritized(PrioritizedConfig),
    Sequential(SequentialConfig),
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        ReplayBufferConfig::Fifo(FifoConfig::default())
    }
}

impl ReplayBufferConfig {
    pub fn build(&self) -> Result<ReplayBufferWrapper> {
        Ok(match self {
            ReplayBufferConfig::Fifo(config) => ReplayBufferWrapper::Fifo(config.build()?),
            ReplayBufferConfig::Prioritized(config) => {
                ReplayBufferWrapper::Prioritized(config.build()?)
            }
            ReplayBufferConfig::Sequential(config) => {
                ReplayBufferWrapper::Sequential(config.build()?)
            }
        })
    }
}

/// Any of the bundled stores, chosen at construction from [ReplayBufferConfig]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReplayBufferWrapper {
    Fifo(FifoReplayBuffer),
    Prioritized(PrioritizedReplayBuffer),
    Sequential(SequentialReplayBuffer),
}

impl ExperienceStore for ReplayBufferWrapper {
    fn push(&mut self, transition: Transition) {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.push(transition),
            ReplayBufferWrapper::Prioritized(store) => store.push(transition),
            ReplayBufferWrapper::Sequential(store) => store.push(transition),
        }
    }

    fn sample(&mut self, batch_size: usize, params: &SampleParams) -> Result<Batch> {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.sample(batch_size, params),
            ReplayBufferWrapper::Prioritized(store) => store.sample(batch_size, params),
            ReplayBufferWrapper::Sequential(store) => store.sample(batch_size, params),
        }
    }

    fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) -> Result<()> {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.update_priorities(indices, priorities),
            ReplayBufferWrapper::Prioritized(store) => store.update_priorities(indices, priorities),
            ReplayBufferWrapper::Sequential(store) => store.update_priorities(indices, priorities),
        }
    }

    fn supports_priorities(&self) -> bool {
        matches!(self, ReplayBufferWrapper::Prioritized(_))
    }

    fn len(&self) -> usize {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.len(),
            ReplayBufferWrapper::Prioritized(store) => store.len(),
            ReplayBufferWrapper::Sequential(store) => store.len(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.capacity(),
            ReplayBufferWrapper::Prioritized(store) => store.capacity(),
            ReplayBufferWrapper::Sequential(store) => store.capacity(),
        }
    }

    fn clear(&mut self) {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.clear(),
            ReplayBufferWrapper::Prioritized(store) => store.clear(),
            ReplayBufferWrapper::Sequential(store) => store.clear(),
        }
    }

    fn end_episode(&mut self) {
        match self {
            ReplayBufferWrapper::Fifo(store) => store.end_episode(),
            ReplayBufferWrapper::Prioritized(store) => store.end_episode(),
            ReplayBufferWrapper::Sequential(store) => store.end_episode(),
        }
    }
}
