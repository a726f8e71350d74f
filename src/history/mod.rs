//! # History Summarizers
//!
//! Under partial observability a single observation is not a sufficient
//! state. A summarizer folds the observation stream of the current episode
//! into a fixed-size [`StateRepr`] the learner can score.
//!
//! ## Available Components
//!
//! - [`HistorySummarizer`] trait: core interface
//! - [`IdentitySummarizer`]: fully observable problems, passes observations through
//! - [`StackingSummarizer`]: window of the last `k` observations
//! - [`RecurrentSummarizer`]: fixed random recurrent fold of the whole history
//!
//! Summarizer state belongs to one episode; the agent calls
//! [`reset`](HistorySummarizer::reset) exactly once per episode boundary.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MetisError, Result};
use crate::types::StateRepr;

pub mod recurrent;
pub mod stacking;

pub use recurrent::RecurrentSummarizer;
pub use stacking::StackingSummarizer;

/// Whether a summarizer has seen anything since its last reset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummarizerPhase {
    Empty,
    Accumulating,
}

/// Folds the observations of an episode into a state representation
pub trait HistorySummarizer {
    /// Incorporate `observation` and return the current summary.
    ///
    /// An observation of the wrong length is a `DimensionMismatch`.
    fn summarize(&mut self, observation: &Array1<f32>) -> Result<StateRepr>;

    /// Drop all episode state
    fn reset(&mut self);

    fn phase(&self) -> SummarizerPhase;

    fn observation_dim(&self) -> usize;

    /// Length of the returned summaries
    fn state_dim(&self) -> usize;
}

pub(crate) fn check_observation(observation: &Array1<f32>, expected: usize) -> Result<()> {
    if observation.len() != expected {
        return Err(MetisError::dimension_mismatch(
            format!("observation of length {}", expected),
            format!("observation of length {}", observation.len()),
        ));
    }
    Ok(())
}

/// Passes observations through unchanged
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentitySummarizer {
    observation_dim: usize,
    phase: SummarizerPhase,
}

impl IdentitySummarizer {
    pub fn new(observation_dim: usize) -> Self {
        Self {
            observation_dim,
            phase: SummarizerPhase::Empty,
        }
    }
}

impl HistorySummarizer for IdentitySummarizer {
    fn summarize(&mut self, observation: &Array1<f32>) -> Result<StateRepr> {
        check_observation(observation, self.observation_dim)?;
        self.phase = SummarizerPhase::Accumulating;
        Ok(observation.clone())
    }

    fn reset(&mut self) {
        self.phase = SummarizerPhase::Empty;
    }

    fn phase(&self) -> SummarizerPhase {
        self.phase
    }

    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn state_dim(&self) -> usize {
        self.observation_dim
    }
}

/// Summarizer selection, tagged by `kind` in config files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummarizerConfig {
    Identity,
    Stacking {
        window: usize,
    },
    Recurrent {
        hidden_dim: usize,
        #[serde(default)]
        seed: u64,
    },
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        SummarizerConfig::Identity
    }
}

impl SummarizerConfig {
    pub fn build(&self, observation_dim: usize) -> Result<SummarizerWrapper> {
        if observation_dim == 0 {
            return Err(MetisError::invalid_parameter(
                "observation_dim",
                "observations must have at least one component",
            ));
        }
        Ok(match *self {
            SummarizerConfig::Identity => SummarizerWrapper::Identity(IdentitySummarizer::new(observation_dim)),
            SummarizerConfig::Stacking { window } => {
                SummarizerWrapper::Stacking(StackingSummarizer::new(observation_dim, window)?)
            }
            SummarizerConfig::Recurrent { hidden_dim, seed } => {
                SummarizerWrapper::Recurrent(RecurrentSummarizer::new(observation_dim, hidden_dim, seed)?)
            }
        })
    }
}

/// Any of the bundled summarizers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SummarizerWrapper {
    Identity(IdentitySummarizer),
    Stacking(StackingSummarizer),
    Recurrent(RecurrentSummarizer),
}

impl HistorySummarizer for SummarizerWrapper {
    fn summarize(&mut self, observation: &Array1<f32>) -> Result<StateRepr> {
        match self {
            SummarizerWrapper::Identity(summarizer) => summarizer.summarize(observation),
            SummarizerWrapper::Stacking(summarizer) => summarizer.summarize(observation),
            SummarizerWrapper::Recurrent(summarizer) => summarizer.summarize(observation),
        }
    }

    fn reset(&mut self) {
        match self {
            SummarizerWrapper::Identity(summarizer) => summarizer.reset(),
            SummarizerWrapper::Stacking(summarizer) => summarizer.reset(),
            SummarizerWrapper::Recurrent(summarizer) => summarizer.reset(),
        }
    }

    fn phase(&self) -> SummarizerPhase {
        match self {
            SummarizerWrapper::Identity(summarizer) => summarizer.phase(),
            SummarizerWrapper::Stacking(summarizer) => summarizer.phase(),
            SummarizerWrapper::Recurrent(summarizer) => summarizer.phase(),
        }
    }

    fn observation_dim(&self) -> usize {
        match self {
            SummarizerWrapper::Identity(summarizer) => summarizer.observation_dim(),
            SummarizerWrapper::Stacking(summarizer) => summarizer.observation_dim(),
            SummarizerWrapper::Recurrent(summarizer) => summarizer.observation_dim(),
        }
    }

    fn state_dim(&self) -> usize {
        match self {
            SummarizerWrapper::Identity(summarizer) => summarizer.state_dim(),
            SummarizerWrapper::Stacking(summarizer) => summarizer.state_dim(),
            SummarizerWrapper::Recurrent(summarizer) => summarizer.state_dim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identity() {
        let mut summarizer = IdentitySummarizer::new(2);
        assert_eq!(summarizer.phase(), SummarizerPhase::Empty);
        assert_eq!(summarizer.summarize(&array![1.0, 2.0]).unwrap(), array![1.0, 2.0]);
        assert_eq!(summarizer.phase(), SummarizerPhase::Accumulating);
        summarizer.reset();
        assert_eq!(summarizer.phase(), SummarizerPhase::Empty);
    }

    #[test]
    fn test_wrong_dimension_is_fatal() {
        let mut summarizer = IdentitySummarizer::new(2);
        match summarizer.summarize(&array![1.0]) {
            Err(MetisError::DimensionMismatch { .. }) => {}
            other => panic!("expected DimensionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_config_build() {
        let config: SummarizerConfig = serde_yaml::from_str("kind: stacking\nwindow: 3\n").unwrap();
        let summarizer = config.build(4).unwrap();
        assert_eq!(summarizer.state_dim(), 12);
        assert!(SummarizerConfig::Identity.build(0).is_err());
        assert!(SummarizerConfig::Stacking { window: 0 }.build(2).is_err());
    }
}
