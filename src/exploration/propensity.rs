use rand::distributions::WeightedIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use super::{require_discrete, ActionScores, ExplorationStrategy};
use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace};

/// Samples an action from the scores read as a probability vector.
///
/// Used with learners that output a policy distribution (actor-critic).
/// The scores need not be normalized but must be non-negative with a
/// positive sum.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Propensity {
    steps: usize,
    rng: ChaCha8Rng,
}

impl Propensity {
    pub fn new(seed: u64) -> Self {
        Self {
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl ExplorationStrategy for Propensity {
    fn select_action(&mut self, scores: &ActionScores, space: &ActionSpace) -> Result<Action> {
        require_discrete(space, "propensity sampling")?;
        scores.check(space)?;
        let distribution = WeightedIndex::new(scores.values.iter())
            .map_err(|e| MetisError::invalid_parameter("scores", format!("not a probability vector: {}", e)))?;
        self.steps += 1;
        Ok(Action::Discrete(distribution.sample(&mut self.rng)))
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_follows_probabilities() {
        let mut strategy = Propensity::new(8);
        let scores = ActionScores::new(array![0.0, 0.75, 0.25]);
        let mut counts = [0usize; 3];
        for _ in 0..4000 {
            let action = strategy.select_action(&scores, &ActionSpace::discrete(3)).unwrap();
            counts[action.to_discrete().unwrap()] += 1;
        }
        assert_eq!(counts[0], 0);
        let frequency = counts[1] as f32 / 4000.0;
        assert!((frequency - 0.75).abs() < 0.03, "frequency {}", frequency);
    }

    #[test]
    fn test_invalid_probabilities() {
        let mut strategy = Propensity::new(0);
        let space = ActionSpace::discrete(2);
        assert!(strategy.select_action(&ActionScores::new(array![0.0, 0.0]), &space).is_err());
        assert!(strategy.select_action(&ActionScores::new(array![-1.0, 2.0]), &space).is_err());
    }
}
