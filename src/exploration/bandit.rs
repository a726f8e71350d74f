use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::{argmax, require_discrete, ActionScores, ExplorationStrategy};
use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace};

/// Upper confidence bound: `argmax(value + c * uncertainty)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ucb {
    c: f32,
    steps: usize,
}

impl Ucb {
    pub fn new(c: f32) -> Result<Self> {
        if !(c.is_finite() && c >= 0.0) {
            return Err(MetisError::invalid_parameter("c", format!("must be non-negative, got {}", c)));
        }
        Ok(Self { c, steps: 0 })
    }
}

impl ExplorationStrategy for Ucb {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        require_discrete(space, "UCB")?;
        scores.check(space)?;
        let uncertainty = scores.require_uncertainty("UCB")?;
        self.steps += 1;
        let bounds = &scores.values + &(uncertainty * self.c);
        Ok(Action::Discrete(argmax(&bounds)?))
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

/// Thompson sampling with Gaussian posteriors: draw
/// `N(value, uncertainty^2)` per action and take the argmax
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThompsonSampling {
    steps: usize,
    rng: ChaCha8Rng,
}

impl ThompsonSampling {
    pub fn new(seed: u64) -> Self {
        Self {
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl ExplorationStrategy for ThompsonSampling {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        require_discrete(space, "Thompson sampling")?;
        scores.check(space)?;
        let uncertainty = scores.require_uncertainty("Thompson sampling")?;
        if uncertainty.iter().any(|u| !(u.is_finite() && *u >= 0.0)) {
            return Err(MetisError::invalid_parameter(
                "uncertainty",
                "standard deviations must be finite and non-negative",
            ));
        }
        self.steps += 1;
        let rng = &mut self.rng;
        let draws = ndarray::Zip::from(&scores.values)
            .and(uncertainty)
            .map_collect(|&mean, &std| {
                let z: f32 = StandardNormal.sample(&mut *rng);
                mean + std * z
            });
        Ok(Action::Discrete(argmax(&draws)?))
    }

    fn steps(&self) -> usize {
        self.steps
    }
}
