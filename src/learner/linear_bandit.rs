use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{check_state, discrete_actions, discrete_index, LearnStats, PolicyLearner};
use crate::error::{MetisError, Result};
use crate::exploration::ActionScores;
use crate::replay_buffer::Batch;
use crate::types::{ActionSpace, StateRepr};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearBanditConfig {
    /// Ridge penalty `lambda`; each arm starts from `A = lambda * I`
    pub regularization: f32,
    /// Append a constant 1 feature to every context
    pub include_bias: bool,
}

impl Default for LinearBanditConfig {
    fn default() -> Self {
        Self {
            regularization: 1.0,
            include_bias: true,
        }
    }
}

impl LinearBanditConfig {
    pub fn regularization(mut self, regularization: f32) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn include_bias(mut self, include_bias: bool) -> Self {
        self.include_bias = include_bias;
        self
    }
}

/// Ridge regression state of one arm
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ArmModel {
    a_inv: Array2<f32>,
    b: Array1<f32>,
    theta: Array1<f32>,
    count: usize,
}

impl ArmModel {
    fn new(dim: usize, regularization: f32) -> Self {
        Self {
            a_inv: Array2::eye(dim) / regularization,
            b: Array1::zeros(dim),
            theta: Array1::zeros(dim),
            count: 0,
        }
    }

    fn predict(&self, x: &Array1<f32>) -> f32 {
        self.theta.dot(x)
    }

    fn uncertainty(&self, x: &Array1<f32>) -> f32 {
        x.dot(&self.a_inv.dot(x)).max(0.0).sqrt()
    }

    /// Adds `weight * x x^T` to `A` through Sherman-Morrison and `weight * r * x` to `b`
    fn update(&mut self, x: &Array1<f32>, reward: f32, weight: f32) {
        let a_inv_x = self.a_inv.dot(x);
        let denominator = 1.0 + weight * x.dot(&a_inv_x);
        let outer = a_inv_x
            .view()
            .insert_axis(ndarray::Axis(1))
            .dot(&a_inv_x.view().insert_axis(ndarray::Axis(0)));
        self.a_inv.scaled_add(-weight / denominator, &outer);
        self.b.scaled_add(weight * reward, x);
        self.theta = self.a_inv.dot(&self.b);
        self.count += 1;
    }
}

/// Disjoint linear contextual bandit (LinUCB).
///
/// Every arm keeps its own ridge regression of reward on context. Scores are
/// the predicted rewards and the uncertainty is `sqrt(x^T A^-1 x)`, so UCB and
/// Thompson exploration can be layered on top. Only the immediate reward of
/// each transition is used; bootstrapping does not apply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearBanditLearner {
    arms: Vec<ArmModel>,
    state_dim: usize,
    include_bias: bool,
    action_space: ActionSpace,
    learn_steps: usize,
}

impl LinearBanditLearner {
    pub fn new(state_dim: usize, action_space: ActionSpace, config: &LinearBanditConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "linear bandit")?;
        if !(config.regularization.is_finite() && config.regularization > 0.0) {
            return Err(MetisError::invalid_parameter(
                "regularization",
                format!("must be positive, got {}", config.regularization),
            ));
        }
        let feature_dim = state_dim + usize::from(config.include_bias);
        Ok(Self {
            arms: (0..n_actions)
                .map(|_| ArmModel::new(feature_dim, config.regularization))
                .collect(),
            state_dim,
            include_bias: config.include_bias,
            action_space,
            learn_steps: 0,
        })
    }

    /// Regression coefficients of `action`, bias term last
    pub fn coefficients(&self, action: usize) -> Option<&Array1<f32>> {
        self.arms.get(action).map(|arm| &arm.theta)
    }

    /// Number of observations each arm has been fitted on
    pub fn arm_counts(&self) -> Vec<usize> {
        self.arms.iter().map(|arm| arm.count).collect()
    }

    fn features(&self, state: &StateRepr) -> Result<Array1<f32>> {
        check_state(state, self.state_dim)?;
        if !self.include_bias {
            return Ok(state.clone());
        }
        let mut x = Array1::ones(self.state_dim + 1);
        x.slice_mut(ndarray::s![..self.state_dim]).assign(state);
        Ok(x)
    }
}

impl PolicyLearner for LinearBanditLearner {
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        let x = self.features(state)?;
        let values = self.arms.iter().map(|arm| arm.predict(&x)).collect::<Array1<f32>>();
        let uncertainty = self.arms.iter().map(|arm| arm.uncertainty(&x)).collect::<Array1<f32>>();
        Ok(ActionScores::new(values).with_uncertainty(uncertainty))
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        if batch.is_empty() {
            return Err(MetisError::EmptyBatch("learn_batch called with no items".to_string()));
        }
        let n_actions = self.arms.len();
        let mut td_errors = vec![0.0f32; batch.len()];
        let (mut loss, mut value_sum, mut count) = (0.0, 0.0, 0usize);

        // Check every item before any arm moves
        let items = batch
            .flat_transitions()
            .into_iter()
            .map(|(item, transition)| {
                let action = discrete_index(transition.action(), n_actions)?;
                let x = self.features(transition.state_before())?;
                Ok((item, action, x, transition.reward()))
            })
            .collect::<Result<Vec<_>>>()?;

        for (item, action, x, reward) in items {
            let prediction = self.arms[action].predict(&x);
            let error = reward - prediction;
            let weight = batch.weight(item);

            loss += weight * error * error;
            value_sum += prediction;
            count += 1;
            td_errors[item] = td_errors[item].max(error.abs());

            self.arms[action].update(&x, reward, weight);
        }
        self.learn_steps += 1;

        let count = count.max(1) as f32;
        Ok(LearnStats {
            loss: loss / count,
            value_estimate: Some(value_sum / count),
            td_errors,
            extra: BTreeMap::new(),
        })
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn learn_steps(&self) -> usize {
        self.learn_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Transition};
    use ndarray::array;

    fn pull(context: Array1<f32>, action: usize, reward: f32) -> Transition {
        Transition::new(context.clone(), Action::Discrete(action), reward, context, true, false)
    }

    #[test]
    fn test_untrained_scores_are_zero_with_prior_uncertainty() {
        let learner = LinearBanditLearner::new(2, ActionSpace::discrete(3), &LinearBanditConfig::default()).unwrap();
        let scores = learner.act(&array![1.0, 0.0]).unwrap();
        assert!(scores.values.iter().all(|v| *v == 0.0));
        // x = [1, 0, 1], A^-1 = I
        let expected = 2.0f32.sqrt();
        let uncertainty = scores.uncertainty.unwrap();
        assert!(uncertainty.iter().all(|u| (u - expected).abs() < 1e-5));
    }

    #[test]
    fn test_recovers_linear_rewards() {
        let config = LinearBanditConfig::default().regularization(1e-4);
        let mut learner = LinearBanditLearner::new(2, ActionSpace::discrete(2), &config).unwrap();
        let contexts = [array![1.0, 0.0], array![0.0, 1.0], array![1.0, 1.0], array![0.5, -1.0]];
        let transitions: Vec<Transition> = contexts
            .iter()
            .flat_map(|x| {
                let r0 = 2.0 * x[0] - x[1] + 0.5;
                let r1 = -x[0] + 3.0 * x[1];
                vec![pull(x.clone(), 0, r0), pull(x.clone(), 1, r1)]
            })
            .collect();
        learner.learn_batch(&Batch::from_transitions(transitions)).unwrap();

        let theta = learner.coefficients(0).unwrap();
        assert!((theta[0] - 2.0).abs() < 0.01);
        assert!((theta[1] + 1.0).abs() < 0.01);
        assert!((theta[2] - 0.5).abs() < 0.01);

        let scores = learner.act(&array![0.0, 2.0]).unwrap();
        assert!((scores.values[1] - 6.0).abs() < 0.02);
        assert_eq!(learner.arm_counts(), vec![4, 4]);
    }

    #[test]
    fn test_uncertainty_shrinks_with_data() {
        let mut learner = LinearBanditLearner::new(1, ActionSpace::discrete(2), &LinearBanditConfig::default()).unwrap();
        let state = array![1.0];
        let before = learner.act(&state).unwrap().uncertainty.unwrap();
        let batch = Batch::from_transitions((0..10).map(|_| pull(state.clone(), 0, 1.0)).collect());
        learner.learn_batch(&batch).unwrap();
        let after = learner.act(&state).unwrap().uncertainty.unwrap();
        assert!(after[0] < before[0]);
        assert_eq!(after[1], before[1]);
    }

    #[test]
    fn test_td_errors_per_item() {
        let mut learner = LinearBanditLearner::new(1, ActionSpace::discrete(2), &LinearBanditConfig::default()).unwrap();
        let stats = learner
            .learn_batch(&Batch::from_transitions(vec![pull(array![1.0], 0, 2.0), pull(array![1.0], 1, -1.0)]))
            .unwrap();
        assert_eq!(stats.td_errors, vec![2.0, 1.0]);
        assert!((stats.loss - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_continuous_space() {
        let space = ActionSpace::continuous(array![-1.0], array![1.0]);
        let result = LinearBanditLearner::new(1, space, &LinearBanditConfig::default());
        assert!(matches!(result, Err(MetisError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_invalid_item_leaves_arms_untouched() {
        let mut learner = LinearBanditLearner::new(1, ActionSpace::discrete(2), &LinearBanditConfig::default()).unwrap();
        let batch = Batch::from_transitions(vec![pull(array![1.0], 0, 2.0), pull(array![1.0], 5, 1.0)]);
        assert!(matches!(learner.learn_batch(&batch), Err(MetisError::ActionSpaceViolation(_))));
        assert_eq!(learner.arm_counts(), vec![0, 0]);
        assert_eq!(learner.learn_steps(), 0);
        assert!(learner.coefficients(0).unwrap().iter().all(|c| *c == 0.0));
    }
}
