//! # Exploration Strategies
//!
//! An exploration strategy turns the learner's [`ActionScores`] into a
//! concrete [`Action`], trading off exploiting the current estimates against
//! trying something else.
//!
//! | Strategy | Space | Needs uncertainty |
//! |----------|-------|-------------------|
//! | [`Greedy`] | both | no |
//! | [`EpsilonGreedy`] | both | no |
//! | [`GaussianNoise`] | continuous | no |
//! | [`OrnsteinUhlenbeck`] | continuous | no |
//! | [`Ucb`] | discrete | yes |
//! | [`ThompsonSampling`] | discrete | yes |
//! | [`Propensity`] | discrete | no (scores are probabilities) |
//!
//! Every randomized strategy owns a seeded `ChaCha8Rng`, so a run is
//! reproducible and the generator state survives a checkpoint.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace};

pub mod bandit;
pub mod greedy;
pub mod noise;
pub mod propensity;

pub use bandit::{ThompsonSampling, Ucb};
pub use greedy::{EpsilonGreedy, EpsilonSchedule, Greedy};
pub use noise::{GaussianNoise, OrnsteinUhlenbeck};
pub use propensity::Propensity;

/// Learner output for one state.
///
/// Discrete spaces get one score per action; continuous spaces get the
/// proposed action vector. `uncertainty`, when present, is aligned with
/// `values`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionScores {
    pub values: Array1<f32>,
    pub uncertainty: Option<Array1<f32>>,
}

impl ActionScores {
    pub fn new(values: Array1<f32>) -> Self {
        Self {
            values,
            uncertainty: None,
        }
    }

    pub fn with_uncertainty(mut self, uncertainty: Array1<f32>) -> Self {
        self.uncertainty = Some(uncertainty);
        self
    }

    /// Check the scores fit `space`.
    ///
    /// A discrete score vector of the wrong length is an `ActionSpaceViolation`.
    pub fn check(&self, space: &ActionSpace) -> Result<()> {
        if let ActionSpace::Discrete { n } = space {
            if self.values.len() != *n {
                return Err(MetisError::ActionSpaceViolation(format!(
                    "{} scores for {} discrete actions",
                    self.values.len(),
                    n
                )));
            }
        }
        if let Some(uncertainty) = &self.uncertainty {
            if uncertainty.len() != self.values.len() {
                return Err(MetisError::dimension_mismatch(
                    format!("{} uncertainties", self.values.len()),
                    format!("{} uncertainties", uncertainty.len()),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn require_uncertainty(&self, strategy: &str) -> Result<&Array1<f32>> {
        self.uncertainty.as_ref().ok_or_else(|| {
            MetisError::UnsupportedOperation(format!(
                "{} needs uncertainty estimates, the learner provided none",
                strategy
            ))
        })
    }
}

/// Index of the largest value; ties go to the lowest index, NaNs are skipped
pub fn argmax(values: &Array1<f32>) -> Result<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some(b) if values[b] >= v => {}
            _ => best = Some(i),
        }
    }
    best.ok_or_else(|| MetisError::invalid_parameter("scores", "no comparable score (empty or all NaN)"))
}

/// Pure exploitation: argmax for discrete spaces, clamped proposal for
/// continuous ones
pub fn greedy_action(scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
    scores.check(space)?;
    match space {
        ActionSpace::Discrete { .. } => Ok(Action::Discrete(argmax(&scores.values)?)),
        ActionSpace::Continuous { .. } => Ok(Action::Continuous(space.clamp(&scores.values)?)),
    }
}

pub(crate) fn require_discrete(space: &ActionSpace, strategy: &str) -> Result<()> {
    if space.is_discrete() {
        Ok(())
    } else {
        Err(MetisError::UnsupportedOperation(format!(
            "{} only supports discrete action spaces",
            strategy
        )))
    }
}

pub(crate) fn require_continuous(space: &ActionSpace, strategy: &str) -> Result<()> {
    if space.is_discrete() {
        Err(MetisError::UnsupportedOperation(format!(
            "{} only supports continuous action spaces",
            strategy
        )))
    } else {
        Ok(())
    }
}

/// Chooses an action from learner scores
pub trait ExplorationStrategy {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action>;

    /// Clear per-episode state (noise processes)
    fn reset(&mut self) {}

    /// Number of `select_action` calls so far
    fn steps(&self) -> usize;

    /// Current exploration rate (epsilon, noise scale) if the strategy has one
    fn exploration_rate(&self) -> Option<f32> {
        None
    }
}

fn default_seed() -> u64 {
    42
}

/// Strategy selection, tagged by `kind` in config files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplorationConfig {
    Greedy,
    EpsilonGreedy {
        schedule: EpsilonSchedule,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    GaussianNoise {
        sigma: EpsilonSchedule,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    OrnsteinUhlenbeck {
        #[serde(default = "noise::default_theta")]
        theta: f32,
        #[serde(default = "noise::default_sigma")]
        sigma: f32,
        #[serde(default = "noise::default_dt")]
        dt: f32,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    Ucb {
        c: f32,
    },
    ThompsonSampling {
        #[serde(default = "default_seed")]
        seed: u64,
    },
    Propensity {
        #[serde(default = "default_seed")]
        seed: u64,
    },
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        ExplorationConfig::EpsilonGreedy {
            schedule: EpsilonSchedule::Constant { epsilon: 0.1 },
            seed: default_seed(),
        }
    }
}

impl ExplorationConfig {
    pub fn build(&self) -> Result<ExplorationWrapper> {
        Ok(match self {
            ExplorationConfig::Greedy => ExplorationWrapper::Greedy(Greedy::new()),
            ExplorationConfig::EpsilonGreedy { schedule, seed } => {
                ExplorationWrapper::EpsilonGreedy(EpsilonGreedy::new(schedule.clone(), *seed)?)
            }
            ExplorationConfig::GaussianNoise { sigma, seed } => {
                ExplorationWrapper::GaussianNoise(GaussianNoise::new(sigma.clone(), *seed)?)
            }
            ExplorationConfig::OrnsteinUhlenbeck { theta, sigma, dt, seed } => {
                ExplorationWrapper::OrnsteinUhlenbeck(OrnsteinUhlenbeck::new(*theta, *sigma, *dt, *seed)?)
            }
            ExplorationConfig::Ucb { c } => ExplorationWrapper::Ucb(Ucb::new(*c)?),
            ExplorationConfig::ThompsonSampling { seed } => {
                ExplorationWrapper::ThompsonSampling(ThompsonSampling::new(*seed))
            }
            ExplorationConfig::Propensity { seed } => ExplorationWrapper::Propensity(Propensity::new(*seed)),
        })
    }
}

/// Any of the bundled strategies
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExplorationWrapper {
    Greedy(Greedy),
    EpsilonGreedy(EpsilonGreedy),
    GaussianNoise(GaussianNoise),
    OrnsteinUhlenbeck(OrnsteinUhlenbeck),
    Ucb(Ucb),
    ThompsonSampling(ThompsonSampling),
    Propensity(Propensity),
}

macro_rules! dispatch {
    ($self:ident, $strategy:ident => $call:expr) => {
        match $self {
            ExplorationWrapper::Greedy($strategy) => $call,
            ExplorationWrapper::EpsilonGreedy($strategy) => $call,
            ExplorationWrapper::GaussianNoise($strategy) => $call,
            ExplorationWrapper::OrnsteinUhlenbeck($strategy) => $call,
            ExplorationWrapper::Ucb($strategy) => $call,
            ExplorationWrapper::ThompsonSampling($strategy) => $call,
            ExplorationWrapper::Propensity($strategy) => $call,
        }
    };
}

impl ExplorationStrategy for ExplorationWrapper {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        dispatch!(self, strategy => strategy.select_action(scores, space))
    }

    fn reset(&mut self) {
        dispatch!(self, strategy => strategy.reset())
    }

    fn steps(&self) -> usize {
        dispatch!(self, strategy => strategy.steps())
    }

    fn exploration_rate(&self) -> Option<f32> {
        dispatch!(self, strategy => strategy.exploration_rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_argmax_ties_to_lowest_index() {
        assert_eq!(argmax(&array![1.0, 3.0, 3.0, 2.0]).unwrap(), 1);
        assert_eq!(argmax(&array![f32::NAN, 0.5, 0.5]).unwrap(), 1);
        assert!(argmax(&array![f32::NAN]).is_err());
        assert!(argmax(&Array1::zeros(0)).is_err());
    }

    #[test]
    fn test_wrong_score_length_is_violation() {
        let scores = ActionScores::new(array![1.0, 2.0, 3.0]);
        match greedy_action(&scores, &ActionSpace::discrete(2)) {
            Err(MetisError::ActionSpaceViolation(_)) => {}
            other => panic!("expected ActionSpaceViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_greedy_action_clamps_continuous() {
        let space = ActionSpace::continuous(array![-1.0, -1.0], array![1.0, 1.0]);
        let action = greedy_action(&ActionScores::new(array![3.0, -0.5]), &space).unwrap();
        assert_eq!(action, Action::Continuous(array![1.0, -0.5]));
    }

    #[test]
    fn test_config_yaml() {
        let yaml = "kind: epsilon_greedy\nschedule:\n  linear:\n    start: 1.0\n    end: 0.05\n    steps: 100\n";
        let config: ExplorationConfig = serde_yaml::from_str(yaml).unwrap();
        let strategy = config.build().unwrap();
        assert_eq!(strategy.exploration_rate(), Some(1.0));

        let config: ExplorationConfig = serde_yaml::from_str("kind: ucb\nc: 2.0\n").unwrap();
        assert!(matches!(config.build().unwrap(), ExplorationWrapper::Ucb(_)));
        assert!(ExplorationConfig::Ucb { c: -1.0 }.build().is_err());
    }
}
