use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{check_observation, HistorySummarizer, SummarizerPhase};
use crate::error::{MetisError, Result};
use crate::types::StateRepr;

/// Fixed random recurrent fold of the observation history:
/// `h <- tanh(W_x x + W_h h + b)`.
///
/// The weights are drawn once from `seed` and never trained. `W_h` is scaled
/// so its entries have variance `0.9 / hidden_dim`, which keeps the fold
/// contracting and the summary bounded in `(-1, 1)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecurrentSummarizer {
    input_weights: Array2<f32>,
    recurrent_weights: Array2<f32>,
    bias: Array1<f32>,
    hidden: Array1<f32>,
    steps: usize,
}

impl RecurrentSummarizer {
    pub fn new(observation_dim: usize, hidden_dim: usize, seed: u64) -> Result<Self> {
        if hidden_dim == 0 {
            return Err(MetisError::invalid_parameter("hidden_dim", "must be at least 1"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let input_std = (1.0 / observation_dim as f32).sqrt();
        let recurrent_std = (0.9 / hidden_dim as f32).sqrt();
        let input_dist = Normal::new(0.0, input_std)
            .map_err(|e| MetisError::invalid_parameter("observation_dim", e.to_string()))?;
        let recurrent_dist = Normal::new(0.0, recurrent_std)
            .map_err(|e| MetisError::invalid_parameter("hidden_dim", e.to_string()))?;

        Ok(Self {
            input_weights: Array2::random_using((hidden_dim, observation_dim), input_dist, &mut rng),
            recurrent_weights: Array2::random_using((hidden_dim, hidden_dim), recurrent_dist, &mut rng),
            bias: Array1::zeros(hidden_dim),
            hidden: Array1::zeros(hidden_dim),
            steps: 0,
        })
    }

    pub fn hidden(&self) -> &Array1<f32> {
        &self.hidden
    }
}

impl HistorySummarizer for RecurrentSummarizer {
    fn summarize(&mut self, observation: &Array1<f32>) -> Result<StateRepr> {
        check_observation(observation, self.observation_dim())?;
        let pre = self.input_weights.dot(observation) + self.recurrent_weights.dot(&self.hidden) + &self.bias;
        self.hidden = pre.mapv(f32::tanh);
        self.steps += 1;
        Ok(self.hidden.clone())
    }

    fn reset(&mut self) {
        self.hidden.fill(0.0);
        self.steps = 0;
    }

    fn phase(&self) -> SummarizerPhase {
        if self.steps == 0 {
            SummarizerPhase::Empty
        } else {
            SummarizerPhase::Accumulating
        }
    }

    fn observation_dim(&self) -> usize {
        self.input_weights.ncols()
    }

    fn state_dim(&self) -> usize {
        self.hidden.len()
    }
}
