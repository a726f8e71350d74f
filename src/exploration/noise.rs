use ndarray::Array1;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::{require_continuous, ActionScores, EpsilonSchedule, ExplorationStrategy};
use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace};

pub(crate) fn default_theta() -> f32 {
    0.15
}

pub(crate) fn default_sigma() -> f32 {
    0.2
}

pub(crate) fn default_dt() -> f32 {
    1e-2
}

fn standard_normal(rng: &mut ChaCha8Rng, dim: usize) -> Array1<f32> {
    Array1::from_iter((0..dim).map(|_| StandardNormal.sample(&mut *rng)))
}

/// Additive `N(0, sigma^2)` noise on the proposed action, clamped into the box.
///
/// `sigma` follows a schedule over the number of calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaussianNoise {
    sigma: EpsilonSchedule,
    steps: usize,
    rng: ChaCha8Rng,
}

impl GaussianNoise {
    pub fn new(sigma: EpsilonSchedule, seed: u64) -> Result<Self> {
        sigma.validate("sigma", f32::MAX)?;
        Ok(Self {
            sigma,
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn sigma(&self) -> f32 {
        self.sigma.value(self.steps)
    }
}

impl ExplorationStrategy for GaussianNoise {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        require_continuous(space, "Gaussian noise")?;
        let sigma = self.sigma();
        self.steps += 1;
        let noise = standard_normal(&mut self.rng, scores.values.len()) * sigma;
        Ok(Action::Continuous(space.clamp(&(&scores.values + &noise))?))
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn exploration_rate(&self) -> Option<f32> {
        Some(self.sigma())
    }
}

/// Temporally correlated noise from an Ornstein-Uhlenbeck process:
/// `x += theta * (mu - x) * dt + sigma * sqrt(dt) * N(0, 1)` with `mu = 0`.
///
/// The process state is per episode and returns to zero on `reset`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrnsteinUhlenbeck {
    theta: f32,
    sigma: f32,
    dt: f32,
    state: Array1<f32>,
    steps: usize,
    rng: ChaCha8Rng,
}

impl OrnsteinUhlenbeck {
    pub fn new(theta: f32, sigma: f32, dt: f32, seed: u64) -> Result<Self> {
        for (name, value) in [("theta", theta), ("sigma", sigma), ("dt", dt)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MetisError::invalid_parameter(
                    name,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        Ok(Self {
            theta,
            sigma,
            dt,
            state: Array1::zeros(0),
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn state(&self) -> &Array1<f32> {
        &self.state
    }

    fn sample(&mut self, dim: usize) -> Array1<f32> {
        if self.state.len() != dim {
            self.state = Array1::zeros(dim);
        }
        let diffusion = standard_normal(&mut self.rng, dim) * (self.sigma * self.dt.sqrt());
        let drift = &self.state * (-self.theta * self.dt);
        self.state = &self.state + &drift + &diffusion;
        self.state.clone()
    }
}

impl ExplorationStrategy for OrnsteinUhlenbeck {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        require_continuous(space, "Ornstein-Uhlenbeck noise")?;
        self.steps += 1;
        let noise = self.sample(scores.values.len());
        Ok(Action::Continuous(space.clamp(&(&scores.values + &noise))?))
    }

    fn reset(&mut self) {
        self.state.fill(0.0);
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn exploration_rate(&self) -> Option<f32> {
        Some(self.sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn unit_box() -> ActionSpace {
        ActionSpace::continuous(array![-1.0, -1.0], array![1.0, 1.0])
    }

    #[test]
    fn test_gaussian_noise_stays_in_bounds() {
        let mut strategy = GaussianNoise::new(EpsilonSchedule::Constant { epsilon: 5.0 }, 1).unwrap();
        let scores = ActionScores::new(array![0.9, -0.9]);
        for _ in 0..200 {
            let action = strategy.select_action(&scores, &unit_box()).unwrap();
            assert!(unit_box().contains(&action));
        }
    }

    #[test]
    fn test_gaussian_zero_sigma_is_clamped_proposal() {
        let mut strategy = GaussianNoise::new(EpsilonSchedule::Constant { epsilon: 0.0 }, 1).unwrap();
        let action = strategy
            .select_action(&ActionScores::new(array![2.0, 0.25]), &unit_box())
            .unwrap();
        assert_eq!(action, Action::Continuous(array![1.0, 0.25]));
    }

    #[test]
    fn test_noise_rejects_discrete_space() {
        let mut strategy = OrnsteinUhlenbeck::new(0.15, 0.2, 0.01, 0).unwrap();
        let result = strategy.select_action(&ActionScores::new(array![1.0, 0.0]), &ActionSpace::discrete(2));
        assert!(matches!(result, Err(MetisError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_ou_state_resets_per_episode() {
        let mut strategy = OrnsteinUhlenbeck::new(0.15, 0.5, 0.1, 2).unwrap();
        let scores = ActionScores::new(array![0.0, 0.0]);
        for _ in 0..10 {
            strategy.select_action(&scores, &unit_box()).unwrap();
        }
        assert!(strategy.state().iter().any(|x| *x != 0.0));
        strategy.reset();
        assert!(strategy.state().iter().all(|x| *x == 0.0));
    }
}
