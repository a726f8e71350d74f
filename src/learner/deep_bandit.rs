use ndarray::{s, Array1, Array2, ArrayViewMut1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    build_network, check_learning_rate, check_state, discrete_actions, discrete_index, LearnStats, Mlp, PolicyLearner,
};
use crate::activations::Activation;
use crate::error::{MetisError, Result};
use crate::exploration::ActionScores;
use crate::layers::WeightInit;
use crate::network::{FunctionApproximator, NeuralNetwork};
use crate::optimizer::{GradientClipper, OptimizerConfig};
use crate::replay_buffer::Batch;
use crate::types::{ActionSpace, StateRepr};

/// Configuration of [DeepBanditLearner].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepBanditConfig {
    pub hidden_sizes: Vec<usize>,
    pub hidden_activation: Activation,
    pub weight_init: Option<WeightInit>,
    pub learning_rate: f32,
    pub optimizer: OptimizerConfig,
    pub seed: u64,
}

impl Default for DeepBanditConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![64, 16],
            hidden_activation: Activation::Relu,
            weight_init: None,
            learning_rate: 1e-3,
            // AdamW
            optimizer: OptimizerConfig::Adam {
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
                weight_decay: 0.01,
            },
            seed: 42,
        }
    }
}

impl DeepBanditConfig {
    pub fn hidden_sizes(mut self, sizes: &[usize]) -> Self {
        self.hidden_sizes = sizes.to_vec();
        self
    }

    pub fn hidden_activation(mut self, activation: Activation) -> Self {
        self.hidden_activation = activation;
        self
    }

    pub fn weight_init(mut self, init: WeightInit) -> Self {
        self.weight_init = Some(init);
        self
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Contextual bandit with a neural reward model.
///
/// One network maps the state concatenated with a one-hot action to the
/// expected immediate reward, and is regressed onto observed rewards with a
/// weighted squared loss. Next states are never used. Scores carry no
/// uncertainty, so pair it with greedy or epsilon-greedy exploration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeepBanditLearner<N = NeuralNetwork> {
    network: N,
    state_dim: usize,
    action_space: ActionSpace,
    learning_rate: f32,
    learn_steps: usize,
}

impl DeepBanditLearner<NeuralNetwork> {
    pub fn new(state_dim: usize, action_space: ActionSpace, config: &DeepBanditConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "deep bandit")?;
        let network = build_network(
            state_dim + n_actions,
            1,
            &Mlp::new(&config.hidden_sizes, config.hidden_activation, config.weight_init),
            &config.optimizer,
            GradientClipper::None,
            config.seed,
        );
        Self::from_network(network, action_space, config)
    }
}

impl<N: FunctionApproximator> DeepBanditLearner<N> {
    /// Wrap a reward network taking `state_dim + n_actions` inputs
    pub fn from_network(network: N, action_space: ActionSpace, config: &DeepBanditConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "deep bandit")?;
        check_learning_rate(config.learning_rate)?;
        if network.output_dim() != 1 || network.input_dim() <= n_actions {
            return Err(MetisError::dimension_mismatch(
                format!("network with more than {} inputs and 1 output", n_actions),
                format!("{} inputs and {} outputs", network.input_dim(), network.output_dim()),
            ));
        }
        Ok(Self {
            state_dim: network.input_dim() - n_actions,
            network,
            action_space,
            learning_rate: config.learning_rate,
            learn_steps: 0,
        })
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Write `state` and the one-hot `action` into `row`
    fn fill_row(&self, mut row: ArrayViewMut1<f32>, state: &StateRepr, action: usize) {
        row.slice_mut(s![..self.state_dim]).assign(state);
        row[self.state_dim + action] = 1.0;
    }
}

impl<N: FunctionApproximator> PolicyLearner for DeepBanditLearner<N> {
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        check_state(state, self.state_dim)?;
        let n_actions = self.action_space.dim();
        let mut inputs = Array2::zeros((n_actions, self.state_dim + n_actions));
        for action in 0..n_actions {
            self.fill_row(inputs.row_mut(action), state, action);
        }
        let values = self.network.forward_batch(inputs.view()).column(0).to_owned();
        Ok(ActionScores::new(values))
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        if batch.is_empty() {
            return Err(MetisError::EmptyBatch("learn_batch called with no items".to_string()));
        }
        let n_actions = self.action_space.dim();
        let items = batch
            .flat_transitions()
            .into_iter()
            .map(|(item, transition)| {
                let action = discrete_index(transition.action(), n_actions)?;
                check_state(transition.state_before(), self.state_dim)?;
                Ok((item, action, transition))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut inputs = Array2::zeros((items.len(), self.state_dim + n_actions));
        for (row, (_, action, transition)) in items.iter().enumerate() {
            self.fill_row(inputs.row_mut(row), transition.state_before(), *action);
        }
        let rewards: Array1<f32> = items.iter().map(|(_, _, t)| t.reward()).collect();
        let predictions = self.network.forward_batch(inputs.view()).column(0).to_owned();

        let count = items.len() as f32;
        let mut output_gradients = Array2::zeros((items.len(), 1));
        let mut td_errors = vec![0.0f32; batch.len()];
        let mut loss = 0.0;
        for (row, (item, _, _)) in items.iter().enumerate() {
            let error = predictions[row] - rewards[row];
            let weight = batch.weight(*item);
            loss += weight * error * error / count;
            output_gradients[[row, 0]] = 2.0 * weight * error / count;
            td_errors[*item] = td_errors[*item].max(error.abs());
        }

        self.network
            .update(inputs.view(), output_gradients.view(), self.learning_rate);
        self.learn_steps += 1;

        Ok(LearnStats {
            loss,
            value_estimate: predictions.mean(),
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

    fn config() -> DeepBanditConfig {
        DeepBanditConfig::default().hidden_sizes(&[32]).learning_rate(0.01).seed(11)
    }

    fn pull(context: Array1<f32>, action: usize, reward: f32) -> Transition {
        Transition::new(context.clone(), Action::Discrete(action), reward, context, true, false)
    }

    #[test]
    fn test_fits_per_arm_rewards() {
        let mut learner = DeepBanditLearner::new(2, ActionSpace::discrete(2), &config()).unwrap();
        let left = array![1.0, 0.0];
        let right = array![0.0, 1.0];
        let batch = Batch::from_transitions(vec![
            pull(left.clone(), 0, 1.0),
            pull(left.clone(), 1, 0.0),
            pull(right.clone(), 0, 0.0),
            pull(right.clone(), 1, 1.0),
        ]);
        let first = learner.learn_batch(&batch).unwrap();
        let mut last = first.clone();
        for _ in 0..1000 {
            last = learner.learn_batch(&batch).unwrap();
        }
        assert!(last.loss < first.loss);

        let on_left = learner.act(&left).unwrap().values;
        let on_right = learner.act(&right).unwrap().values;
        assert!((on_left[0] - 1.0).abs() < 0.15 && on_left[1].abs() < 0.15, "left {:?}", on_left);
        assert!((on_right[1] - 1.0).abs() < 0.15 && on_right[0].abs() < 0.15, "right {:?}", on_right);
        assert_eq!(last.td_errors.len(), 4);
    }

    #[test]
    fn test_scores_one_value_per_arm() {
        let learner = DeepBanditLearner::new(3, ActionSpace::discrete(4), &config()).unwrap();
        assert_eq!(learner.network().input_dim(), 7);
        let scores = learner.act(&array![0.1, 0.2, 0.3]).unwrap();
        assert_eq!(scores.values.len(), 4);
        assert!(scores.uncertainty.is_none());
        assert!(learner.act(&array![0.1]).is_err());
    }

    #[test]
    fn test_rejects_bad_items_and_spaces() {
        let mut learner = DeepBanditLearner::new(1, ActionSpace::discrete(2), &config()).unwrap();
        let batch = Batch::from_transitions(vec![pull(array![1.0], 3, 1.0)]);
        assert!(matches!(learner.learn_batch(&batch), Err(MetisError::ActionSpaceViolation(_))));
        assert_eq!(learner.learn_steps(), 0);

        let continuous = ActionSpace::continuous(array![-1.0], array![1.0]);
        assert!(DeepBanditLearner::new(1, continuous, &config()).is_err());
    }
}
