use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{greedy_action, ActionScores, ExplorationStrategy};
use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace};

/// Always exploits
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Greedy {
    steps: usize,
}

impl Greedy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExplorationStrategy for Greedy {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        self.steps += 1;
        greedy_action(scores, space)
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

/// A scalar that decays with the number of steps taken
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpsilonSchedule {
    Constant { epsilon: f32 },
    /// Linear interpolation from `start` to `end` over `steps`, then flat
    Linear { start: f32, end: f32, steps: usize },
    /// `max(end, start * decay^step)`
    Exponential { start: f32, end: f32, decay: f32 },
}

impl EpsilonSchedule {
    pub fn value(&self, step: usize) -> f32 {
        match *self {
            EpsilonSchedule::Constant { epsilon } => epsilon,
            EpsilonSchedule::Linear { start, end, steps } => {
                if step >= steps {
                    end
                } else {
                    start + (end - start) * (step as f32 / steps as f32)
                }
            }
            EpsilonSchedule::Exponential { start, end, decay } => {
                let exponent = step.min(i32::MAX as usize) as i32;
                (start * decay.powi(exponent)).max(end)
            }
        }
    }

    /// Every value the schedule can produce must lie in `[0, upper]`
    pub(crate) fn validate(&self, name: &str, upper: f32) -> Result<()> {
        let in_range = |v: f32| v.is_finite() && (0.0..=upper).contains(&v);
        let ok = match *self {
            EpsilonSchedule::Constant { epsilon } => in_range(epsilon),
            EpsilonSchedule::Linear { start, end, .. } => in_range(start) && in_range(end),
            EpsilonSchedule::Exponential { start, end, decay } => {
                in_range(start) && in_range(end) && (0.0..=1.0).contains(&decay)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(MetisError::invalid_parameter(
                name,
                format!("schedule {:?} leaves [0, {}]", self, upper),
            ))
        }
    }
}

/// With probability epsilon a uniformly random action, otherwise greedy.
///
/// Epsilon is read from the schedule at the current step count, and the
/// count advances once per call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpsilonGreedy {
    schedule: EpsilonSchedule,
    steps: usize,
    rng: ChaCha8Rng,
}

impl EpsilonGreedy {
    pub fn new(schedule: EpsilonSchedule, seed: u64) -> Result<Self> {
        schedule.validate("epsilon", 1.0)?;
        Ok(Self {
            schedule,
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn constant(epsilon: f32, seed: u64) -> Result<Self> {
        Self::new(EpsilonSchedule::Constant { epsilon }, seed)
    }

    pub fn epsilon(&self) -> f32 {
        self.schedule.value(self.steps)
    }
}

impl ExplorationStrategy for EpsilonGreedy {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        scores.check(space)?;
        let epsilon = self.epsilon();
        self.steps += 1;
        if self.rng.gen::<f32>() < epsilon {
            Ok(space.sample(&mut self.rng))
        } else {
            greedy_action(scores, space)
        }
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn exploration_rate(&self) -> Option<f32> {
        Some(self.epsilon())
    }
}
