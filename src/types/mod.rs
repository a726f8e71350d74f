use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MetisError, Result};

/// Fixed-shape state representation produced by a history summarizer.
///
/// This is a plain value: consumers clone it when they need to keep it.
pub type StateRepr = Array1<f32>;

/// An action, either an index into a finite set or a continuous vector
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Discrete(usize),
    Continuous(Array1<f32>),
}

impl Action {
    /// Convert action to integer (for discrete actions)
    pub fn to_discrete(&self) -> Option<usize> {
        match self {
            Action::Discrete(index) => Some(*index),
            Action::Continuous(_) => None,
        }
    }

    /// Convert action to continuous values
    pub fn to_continuous(&self) -> Option<&Array1<f32>> {
        match self {
            Action::Discrete(_) => None,
            Action::Continuous(values) => Some(values),
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Action::Discrete(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Discrete(index) => write!(f, "Discrete({})", index),
            Action::Continuous(values) => write!(f, "Continuous({})", values),
        }
    }
}

/// Action space definition declared by the environment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionSpace {
    Discrete { n: usize },
    Continuous { low: Array1<f32>, high: Array1<f32> },
}

impl ActionSpace {
    pub fn discrete(n: usize) -> Self {
        ActionSpace::Discrete { n }
    }

    pub fn continuous(low: Array1<f32>, high: Array1<f32>) -> Self {
        ActionSpace::Continuous { low, high }
    }

    /// Check that the space itself is well formed
    pub fn validate(&self) -> Result<()> {
        match self {
            ActionSpace::Discrete { n } => {
                if *n == 0 {
                    return Err(MetisError::invalid_parameter(
                        "action_space",
                        "discrete action space must have at least one action",
                    ));
                }
            }
            ActionSpace::Continuous { low, high } => {
                if low.is_empty() || low.len() != high.len() {
                    return Err(MetisError::invalid_parameter(
                        "action_space",
                        format!("bounds must be non-empty and equal length, got {} and {}", low.len(), high.len()),
                    ));
                }
                if low.iter().zip(high.iter()).any(|(&l, &h)| !(l <= h)) {
                    return Err(MetisError::invalid_parameter(
                        "action_space",
                        "every lower bound must be <= its upper bound",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of actions (discrete) or action dimensionality (continuous)
    pub fn dim(&self) -> usize {
        match self {
            ActionSpace::Discrete { n } => *n,
            ActionSpace::Continuous { low, .. } => low.len(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, ActionSpace::Discrete { .. })
    }

    /// Check if an action is valid for this space
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (ActionSpace::Discrete { n }, Action::Discrete(index)) => index < n,
            (ActionSpace::Continuous { low, high }, Action::Continuous(values)) => {
                values.len() == low.len()
                    && values
                        .iter()
                        .zip(low.iter())
                        .zip(high.iter())
                        .all(|((&v, &l), &h)| v >= l && v <= h)
            }
            _ => false,
        }
    }

    /// Like [`contains`](Self::contains) but reports the violation as an error
    pub fn check(&self, action: &Action) -> Result<()> {
        if self.contains(action) {
            Ok(())
        } else {
            Err(MetisError::ActionSpaceViolation(format!(
                "{} is outside {:?}",
                action, self
            )))
        }
    }

    /// Sample a uniformly random action from the space
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        match self {
            ActionSpace::Discrete { n } => Action::Discrete(rng.gen_range(0..*n)),
            ActionSpace::Continuous { low, high } => Action::Continuous(Array1::from_iter(
                low.iter().zip(high.iter()).map(|(&l, &h)| {
                    if l < h {
                        rng.gen_range(l..=h)
                    } else {
                        l
                    }
                }),
            )),
        }
    }

    /// Clamp a continuous vector into the box bounds.
    ///
    /// Returns `ActionSpaceViolation` if the vector has the wrong dimension
    /// or the space is discrete.
    pub fn clamp(&self, values: &Array1<f32>) -> Result<Array1<f32>> {
        match self {
            ActionSpace::Continuous { low, high } => {
                if values.len() != low.len() {
                    return Err(MetisError::ActionSpaceViolation(format!(
                        "continuous action has {} dimensions, space has {}",
                        values.len(),
                        low.len()
                    )));
                }
                if values.iter().any(|v| v.is_nan()) {
                    return Err(MetisError::ActionSpaceViolation(
                        "continuous action contains NaN".to_string(),
                    ));
                }
                Ok(Array1::from_iter(
                    values
                        .iter()
                        .zip(low.iter())
                        .zip(high.iter())
                        .map(|((&v, &l), &h)| v.max(l).min(h)),
                ))
            }
            ActionSpace::Discrete { .. } => Err(MetisError::ActionSpaceViolation(
                "cannot clamp a continuous vector into a discrete space".to_string(),
            )),
        }
    }

    /// Action used when nothing better is available: index 0 or the box midpoint
    pub fn default_action(&self) -> Action {
        match self {
            ActionSpace::Discrete { .. } => Action::Discrete(0),
            ActionSpace::Continuous { low, high } => Action::Continuous((low + high) / 2.0),
        }
    }
}

/// One interaction step, immutable once built.
///
/// Fields are read through accessors; nothing hands out a mutable view, so a
/// transition stays exactly as it was when pushed into a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    state_before: StateRepr,
    action: Action,
    reward: f32,
    state_after: StateRepr,
    terminated: bool,
    truncated: bool,
    auxiliary: Option<BTreeMap<String, f32>>,
}

impl Transition {
    pub fn new(
        state_before: StateRepr,
        action: Action,
        reward: f32,
        state_after: StateRepr,
        terminated: bool,
        truncated: bool,
    ) -> Self {
        Transition {
            state_before,
            action,
            reward,
            state_after,
            terminated,
            truncated,
            auxiliary: None,
        }
    }

    /// Attach auxiliary signals (action propensities, cost signals, ...)
    pub fn with_auxiliary(mut self, auxiliary: BTreeMap<String, f32>) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn state_before(&self) -> &StateRepr {
        &self.state_before
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn reward(&self) -> f32 {
        self.reward
    }

    pub fn state_after(&self) -> &StateRepr {
        &self.state_after
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// True when this transition closes an episode
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }

    pub fn auxiliary(&self) -> Option<&BTreeMap<String, f32>> {
        self.auxiliary.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_action_space_contains() {
        let discrete_space = ActionSpace::discrete(4);
        assert!(discrete_space.contains(&Action::Discrete(2)));
        assert!(!discrete_space.contains(&Action::Discrete(5)));
        assert!(!discrete_space.contains(&Action::Continuous(array![0.0])));

        let continuous_space = ActionSpace::continuous(array![-1.0, -1.0], array![1.0, 1.0]);
        assert!(continuous_space.contains(&Action::Continuous(array![0.5, -0.5])));
        assert!(!continuous_space.contains(&Action::Continuous(array![2.0, 0.0])));
        assert!(!continuous_space.contains(&Action::Continuous(array![0.0])));
        assert!(continuous_space.check(&Action::Discrete(0)).is_err());
    }

    #[test]
    fn test_action_space_validate() {
        assert!(ActionSpace::discrete(0).validate().is_err());
        assert!(ActionSpace::continuous(array![1.0], array![0.0]).validate().is_err());
        assert!(ActionSpace::continuous(array![0.0], array![0.0, 1.0]).validate().is_err());
        assert!(ActionSpace::continuous(array![-2.0], array![2.0]).validate().is_ok());
    }

    #[test]
    fn test_sample_stays_in_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let space = ActionSpace::continuous(array![-1.0, 0.0], array![1.0, 0.0]);
        for _ in 0..100 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
        let space = ActionSpace::discrete(3);
        for _ in 0..100 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
    }

    #[test]
    fn test_clamp_and_default() {
        let space = ActionSpace::continuous(array![-1.0, -2.0], array![1.0, 2.0]);
        assert_eq!(space.clamp(&array![3.0, -5.0]).unwrap(), array![1.0, -2.0]);
        assert!(space.clamp(&array![0.0]).is_err());
        assert_eq!(space.default_action(), Action::Continuous(array![0.0, 0.0]));
        assert_eq!(ActionSpace::discrete(3).default_action(), Action::Discrete(0));
    }

    #[test]
    fn test_transition_accessors() {
        let mut aux = BTreeMap::new();
        aux.insert("cost".to_string(), 0.5);
        let t = Transition::new(array![0.0], Action::Discrete(1), 1.0, array![1.0], false, true)
            .with_auxiliary(aux);
        assert!(t.done());
        assert!(!t.terminated());
        assert_eq!(t.auxiliary().unwrap()["cost"], 0.5);
        assert_eq!(t.action(), &Action::Discrete(1));
    }
}
