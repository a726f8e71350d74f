//! # Experience Store Module
//!
//! Capacity-bounded storage of [`Transition`]s with pluggable sampling.
//!
//! ## Available Stores
//!
//! - [`FifoReplayBuffer`]: ring buffer, uniform sampling without replacement
//!   inside a batch
//! - [`PrioritizedReplayBuffer`]: proportional prioritized replay backed by a
//!   sum tree, with importance-sampling weights `(N * P(i))^-beta`
//! - [`SequentialReplayBuffer`]: fixed-length sub-trajectories that never cross
//!   an episode boundary, padded with `None`
//! - [`SharedStore`]: mutex-guarded wrapper for use from several threads
//!
//! All stores evict the oldest insertion when full unless configured
//! otherwise, and every `sample` call fails with
//! [`MetisError::InsufficientData`] rather than returning a short batch.
//!
//! ## Example
//!
//! ```rust
//! use metis::replay_buffer::{ExperienceStore, FifoReplayBuffer, SampleParams};
//! use metis::types::{Action, Transition};
//! use ndarray::array;
//!
//! let mut store = FifoReplayBuffer::new(100, 7);
//! for i in 0..10 {
//!     store.push(Transition::new(
//!         array![i as f32],
//!         Action::Discrete(0),
//!         1.0,
//!         array![(i + 1) as f32],
//!         false,
//!         false,
//!     ));
//! }
//! let batch = store.sample(4, &SampleParams::default()).unwrap();
//! assert_eq!(batch.len(), 4);
//! ```

mod batch;
mod config;
mod fifo;
mod prioritized;
mod sequential;
mod shared;
mod sum_tree;

pub use batch::{Batch, BatchItems, SampleParams, Sequence};
pub use config::{
    BetaSchedule, EvictionPolicy, FifoConfig, PrioritizedConfig, ReplayBufferConfig,
    ReplayBufferWrapper, SequentialConfig,
};
pub use fifo::FifoReplayBuffer;
pub use prioritized::PrioritizedReplayBuffer;
pub use sequential::SequentialReplayBuffer;
pub use shared::SharedStore;

use crate::error::{MetisError, Result};
use crate::types::Transition;

/// Interface shared by every experience store
pub trait ExperienceStore {
    /// Insert a transition, evicting one item first if the store is full
    fn push(&mut self, transition: Transition);

    /// Draw a batch of `batch_size` items.
    ///
    /// Fails with `InsufficientData` if fewer than `batch_size` eligible
    /// items are stored.
    fn sample(&mut self, batch_size: usize, params: &SampleParams) -> Result<Batch>;

    /// Replace the priorities of previously sampled items.
    ///
    /// Only prioritized stores support this.
    fn update_priorities(&mut self, _indices: &[usize], _priorities: &[f32]) -> Result<()> {
        Err(MetisError::UnsupportedOperation(
            "update_priorities requires a prioritized store".to_string(),
        ))
    }

    /// Whether `update_priorities` is meaningful for this store
    fn supports_priorities(&self) -> bool {
        false
    }

    /// Sample a batch, run `learn` on it, and write back the priorities it
    /// returns when the store is prioritized.
    ///
    /// Stores shared between threads run all three under one lock.
    fn learn_from_sample<T, F>(&mut self, batch_size: usize, params: &SampleParams, learn: F) -> Result<(Batch, T)>
    where
        Self: Sized,
        F: FnOnce(&Batch) -> Result<(T, Option<Vec<f32>>)>,
    {
        let batch = self.sample(batch_size, params)?;
        let (output, priorities) = learn(&batch)?;
        if let Some(priorities) = priorities {
            if self.supports_priorities() {
                self.update_priorities(batch.indices(), &priorities)?;
            }
        }
        Ok((batch, output))
    }

    /// Mark the end of the current episode without a terminal transition.
    ///
    /// Stores that group steps by episode start a new one here.
    fn end_episode(&mut self) {}

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored transition
    fn clear(&mut self);
}

pub(crate) fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(MetisError::invalid_parameter(
            "capacity",
            "Capacity must be greater than 0",
        ));
    }
    Ok(())
}

pub(crate) fn check_available(requested: usize, available: usize) -> Result<()> {
    if requested == 0 {
        return Err(MetisError::invalid_parameter(
            "batch_size",
            "Batch size must be greater than 0",
        ));
    }
    if requested > available {
        return Err(MetisError::InsufficientData { requested, available });
    }
    Ok(())
}
