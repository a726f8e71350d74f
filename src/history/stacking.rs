use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{check_observation, HistorySummarizer, SummarizerPhase};
use crate::error::{MetisError, Result};
use crate::types::StateRepr;

/// Concatenation of the last `window` observations, most recent first.
///
/// Before `window` observations have arrived the missing slots are zeros, so
/// the summary always has length `window * observation_dim`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackingSummarizer {
    observation_dim: usize,
    window: usize,
    history: VecDeque<Array1<f32>>,
}

impl StackingSummarizer {
    pub fn new(observation_dim: usize, window: usize) -> Result<Self> {
        if window == 0 {
            return Err(MetisError::invalid_parameter("window", "must be at least 1"));
        }
        Ok(Self {
            observation_dim,
            window,
            history: VecDeque::with_capacity(window),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn embed(&self) -> StateRepr {
        let mut embedding = Array1::zeros(self.state_dim());
        for (i, observation) in self.history.iter().rev().enumerate() {
            let offset = i * self.observation_dim;
            embedding
                .slice_mut(s![offset..offset + self.observation_dim])
                .assign(observation);
        }
        embedding
    }
}

impl HistorySummarizer for StackingSummarizer {
    fn summarize(&mut self, observation: &Array1<f32>) -> Result<StateRepr> {
        check_observation(observation, self.observation_dim)?;
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(observation.clone());
        Ok(self.embed())
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn phase(&self) -> SummarizerPhase {
        if self.history.is_empty() {
            SummarizerPhase::Empty
        } else {
            SummarizerPhase::Accumulating
        }
    }

    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn state_dim(&self) -> usize {
        self.window * self.observation_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_window_most_recent_first() {
        let mut summarizer = StackingSummarizer::new(2, 3).unwrap();
        assert_eq!(
            summarizer.summarize(&array![1.0, 1.0]).unwrap(),
            array![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]
        );
        summarizer.summarize(&array![2.0, 2.0]).unwrap();
        summarizer.summarize(&array![3.0, 3.0]).unwrap();
        assert_eq!(
            summarizer.summarize(&array![4.0, 4.0]).unwrap(),
            array![4.0, 4.0, 3.0, 3.0, 2.0, 2.0]
        );
    }

    #[test]
    fn test_reset_forgets_previous_episode() {
        let mut summarizer = StackingSummarizer::new(1, 2).unwrap();
        summarizer.summarize(&array![9.0]).unwrap();
        summarizer.reset();
        assert_eq!(summarizer.phase(), SummarizerPhase::Empty);

        let mut fresh = StackingSummarizer::new(1, 2).unwrap();
        assert_eq!(
            summarizer.summarize(&array![5.0]).unwrap(),
            fresh.summarize(&array![5.0]).unwrap()
        );
    }
}
