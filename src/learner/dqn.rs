use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    build_network, check_gamma, check_learning_rate, check_state, discrete_actions, discrete_index, n_step_target,
    rollouts, stack_states, LearnStats, Mlp, PolicyLearner, TargetUpdate,
};
use crate::activations::Activation;
use crate::error::{MetisError, Result};
use crate::exploration::{argmax, ActionScores};
use crate::layers::WeightInit;
use crate::network::{FunctionApproximator, NeuralNetwork};
use crate::optimizer::{GradientClipper, OptimizerConfig};
use crate::replay_buffer::Batch;
use crate::types::{ActionSpace, StateRepr};

/// Per-item TD loss
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TdLoss {
    Mse,
    /// Quadratic inside `[-delta, delta]`, linear outside
    Huber { delta: f32 },
}

impl Default for TdLoss {
    fn default() -> Self {
        TdLoss::Huber { delta: 1.0 }
    }
}

impl TdLoss {
    /// `(loss, d loss / d prediction)` for `td = target - prediction`
    fn evaluate(&self, td: f32) -> (f32, f32) {
        match *self {
            TdLoss::Mse => (0.5 * td * td, -td),
            TdLoss::Huber { delta } => {
                if td.abs() <= delta {
                    (0.5 * td * td, -td)
                } else {
                    (delta * (td.abs() - 0.5 * delta), -delta * td.signum())
                }
            }
        }
    }
}

/// Configuration of [DqnLearner].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    pub hidden_sizes: Vec<usize>,
    pub hidden_activation: Activation,
    pub weight_init: Option<WeightInit>,
    pub learning_rate: f32,
    pub gamma: f32,
    pub double_dqn: bool,
    pub loss: TdLoss,
    pub target_update: TargetUpdate,
    pub optimizer: OptimizerConfig,
    pub clipper: GradientClipper,
    pub seed: u64,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![64, 64],
            hidden_activation: Activation::Relu,
            weight_init: None,
            learning_rate: 1e-3,
            gamma: 0.99,
            double_dqn: true,
            loss: TdLoss::default(),
            target_update: TargetUpdate::default(),
            optimizer: OptimizerConfig::default(),
            clipper: GradientClipper::None,
            seed: 42,
        }
    }
}

impl DqnConfig {
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

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn double_dqn(mut self, double_dqn: bool) -> Self {
        self.double_dqn = double_dqn;
        self
    }

    pub fn loss(mut self, loss: TdLoss) -> Self {
        self.loss = loss;
        self
    }

    pub fn target_update(mut self, target_update: TargetUpdate) -> Self {
        self.target_update = target_update;
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

/// Deep Q-learning with a target network.
///
/// Targets are `r + gamma * Q_target(s', a*)` where `a*` is the online
/// network's argmax (double DQN) or the target network's own argmax. On
/// sequence batches the target is the n-step return over the real steps of
/// each sequence, bootstrapped from its last state unless it terminated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DqnLearner<N = NeuralNetwork> {
    q_network: N,
    target_network: N,
    action_space: ActionSpace,
    learning_rate: f32,
    gamma: f32,
    double_dqn: bool,
    loss: TdLoss,
    target_update: TargetUpdate,
    learn_steps: usize,
}

impl DqnLearner<NeuralNetwork> {
    pub fn new(state_dim: usize, action_space: ActionSpace, config: &DqnConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "DQN")?;
        let q_network = build_network(
            state_dim,
            n_actions,
            &Mlp::new(&config.hidden_sizes, config.hidden_activation, config.weight_init),
            &config.optimizer,
            config.clipper.clone(),
            config.seed,
        );
        Self::from_network(q_network, action_space, config)
    }
}

impl<N: FunctionApproximator> DqnLearner<N> {
    /// Wrap an existing Q-network; the target network starts as a copy
    pub fn from_network(q_network: N, action_space: ActionSpace, config: &DqnConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "DQN")?;
        check_gamma(config.gamma)?;
        check_learning_rate(config.learning_rate)?;
        config.target_update.validate()?;
        if q_network.output_dim() != n_actions {
            return Err(MetisError::dimension_mismatch(
                format!("{} Q-values", n_actions),
                format!("{} Q-values", q_network.output_dim()),
            ));
        }
        Ok(Self {
            target_network: q_network.clone(),
            q_network,
            action_space,
            learning_rate: config.learning_rate,
            gamma: config.gamma,
            double_dqn: config.double_dqn,
            loss: config.loss,
            target_update: config.target_update.clone(),
            learn_steps: 0,
        })
    }

    pub fn q_network(&self) -> &N {
        &self.q_network
    }

    pub fn target_network(&self) -> &N {
        &self.target_network
    }

    /// Bootstrap values `Q_target(s', a*)` for a batch of next states
    fn bootstrap_values(&self, next_states: &Array2<f32>) -> Result<Vec<f32>> {
        let target_q = self.target_network.forward_batch(next_states.view());
        let selector_q = if self.double_dqn {
            self.q_network.forward_batch(next_states.view())
        } else {
            target_q.clone()
        };
        selector_q
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| Ok(target_q[[i, argmax(&row.to_owned())?]]))
            .collect()
    }
}

impl<N: FunctionApproximator> PolicyLearner for DqnLearner<N> {
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        check_state(state, self.q_network.input_dim())?;
        Ok(ActionScores::new(self.q_network.forward(state.view())))
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        let rollouts = rollouts(batch)?;
        let n_actions = self.action_space.dim();
        let state_dim = self.q_network.input_dim();
        let actions = rollouts
            .iter()
            .map(|r| discrete_index(r.first.action(), n_actions))
            .collect::<Result<Vec<_>>>()?;
        let states = stack_states(rollouts.iter().map(|r| r.first.state_before()), state_dim)?;
        let next_states = stack_states(rollouts.iter().map(|r| r.last_state), state_dim)?;

        let bootstrap = self.bootstrap_values(&next_states)?;
        let q_values = self.q_network.forward_batch(states.view());

        let batch_size = rollouts.len() as f32;
        let mut output_gradients = Array2::zeros(q_values.dim());
        let mut td_errors = Vec::with_capacity(rollouts.len());
        let mut loss = 0.0;
        let mut value_sum = 0.0;
        for (i, rollout) in rollouts.iter().enumerate() {
            let target = n_step_target(&rollout.rewards, self.gamma, bootstrap[i], rollout.terminated);
            let prediction = q_values[[i, actions[i]]];
            let weight = batch.weight(i);
            let (item_loss, slope) = self.loss.evaluate(target - prediction);
            loss += weight * item_loss / batch_size;
            output_gradients[[i, actions[i]]] = weight * slope / batch_size;
            td_errors.push((target - prediction).abs());
            value_sum += prediction;
        }

        self.q_network
            .update(states.view(), output_gradients.view(), self.learning_rate);
        self.learn_steps += 1;

        if let Some(tau) = self.target_update.tau_at(self.learn_steps) {
            self.target_network.soft_update_from(&self.q_network, tau)?;
            if tau >= 1.0 {
                debug!("DQN target network refreshed at learn step {}", self.learn_steps);
            }
        }

        Ok(LearnStats {
            loss,
            value_estimate: Some(value_sum / batch_size),
            td_errors,
            extra: Default::default(),
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
    use crate::replay_buffer::{BatchItems, Sequence};
    use crate::types::{Action, Transition};
    use ndarray::array;

    fn config() -> DqnConfig {
        DqnConfig::default()
            .hidden_sizes(&[16])
            .learning_rate(0.02)
            .optimizer(OptimizerConfig::Sgd)
            .seed(3)
    }

    fn bandit_step(action: usize, reward: f32) -> Transition {
        Transition::new(array![1.0, 0.0], Action::Discrete(action), reward, array![1.0, 0.0], true, false)
    }

    #[test]
    fn test_rejects_continuous_space_and_bad_gamma() {
        let continuous = ActionSpace::continuous(array![-1.0], array![1.0]);
        assert!(DqnLearner::new(2, continuous, &config()).is_err());
        assert!(DqnLearner::new(2, ActionSpace::discrete(2), &config().gamma(1.0)).is_err());
    }

    #[test]
    fn test_act_scores_every_action() {
        let learner = DqnLearner::new(2, ActionSpace::discrete(3), &config()).unwrap();
        let scores = learner.act(&array![0.5, -0.5]).unwrap();
        assert_eq!(scores.values.len(), 3);
        assert!(learner.act(&array![0.5]).is_err());
    }

    #[test]
    fn test_learns_terminal_rewards() {
        let mut learner = DqnLearner::new(2, ActionSpace::discrete(2), &config()).unwrap();
        let batch = Batch::from_transitions(vec![bandit_step(0, 1.0), bandit_step(1, -1.0)]);
        let first = learner.learn_batch(&batch).unwrap();
        let mut last = first.clone();
        for _ in 0..500 {
            last = learner.learn_batch(&batch).unwrap();
        }
        assert!(last.loss < first.loss);
        let q = learner.act(&array![1.0, 0.0]).unwrap().values;
        assert!((q[0] - 1.0).abs() < 0.1, "q = {:?}", q);
        assert!((q[1] + 1.0).abs() < 0.1, "q = {:?}", q);
        assert_eq!(learner.learn_steps(), 501);
        assert_eq!(last.td_errors.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let mut learner = DqnLearner::new(2, ActionSpace::discrete(2), &config()).unwrap();
        assert!(matches!(
            learner.learn_batch(&Batch::from_transitions(Vec::new())),
            Err(MetisError::EmptyBatch(_))
        ));
        assert_eq!(learner.learn_steps(), 0);
    }

    #[test]
    fn test_hard_target_update() {
        let config = config().target_update(TargetUpdate::Hard { every: 2 });
        let mut learner = DqnLearner::new(2, ActionSpace::discrete(2), &config).unwrap();
        let batch = Batch::from_transitions(vec![bandit_step(0, 1.0)]);
        learner.learn_batch(&batch).unwrap();
        assert_ne!(learner.q_network().layers, learner.target_network().layers);
        learner.learn_batch(&batch).unwrap();
        assert_eq!(learner.q_network().layers, learner.target_network().layers);
    }

    #[test]
    fn test_sequence_batches_use_n_step_targets() {
        let mut learner = DqnLearner::new(2, ActionSpace::discrete(2), &config().gamma(0.5)).unwrap();
        let sequence = Sequence::new(vec![
            Some(Transition::new(array![0.0, 1.0], Action::Discrete(1), 1.0, array![1.0, 1.0], false, false)),
            Some(Transition::new(array![1.0, 1.0], Action::Discrete(0), 2.0, array![2.0, 1.0], true, false)),
        ]);
        let batch = Batch::new(BatchItems::Sequences(vec![sequence]), None, vec![7]);
        let prediction = learner.act(&array![0.0, 1.0]).unwrap().values[1];
        let stats = learner.learn_batch(&batch).unwrap();
        // 1 + 0.5 * 2, no bootstrap after termination
        assert!((stats.td_errors[0] - (2.0 - prediction).abs()).abs() < 1e-5);
    }

    #[test]
    fn test_importance_weights_scale_loss() {
        let make = || DqnLearner::new(2, ActionSpace::discrete(2), &config()).unwrap();
        let transitions = vec![bandit_step(0, 1.0)];
        let unweighted = make()
            .learn_batch(&Batch::new(BatchItems::Transitions(transitions.clone()), None, vec![0]))
            .unwrap();
        let weighted = make()
            .learn_batch(&Batch::new(BatchItems::Transitions(transitions), Some(vec![0.5]), vec![0]))
            .unwrap();
        assert!((weighted.loss - 0.5 * unweighted.loss).abs() < 1e-6);
    }

    #[test]
    fn test_network_layout_follows_config() {
        let zeros = config().hidden_activation(Activation::Sigmoid).weight_init(WeightInit::Zeros);
        let learner = DqnLearner::new(2, ActionSpace::discrete(3), &zeros).unwrap();
        let layers = &learner.q_network().layers;
        assert_eq!(layers[0].activation, Activation::Sigmoid);
        assert_eq!(layers[1].activation, Activation::Linear);
        assert_eq!(learner.act(&array![0.3, 0.7]).unwrap().values, array![0.0, 0.0, 0.0]);

        let uniform = config().weight_init(WeightInit::Uniform { min: -0.1, max: 0.1 });
        let learner = DqnLearner::new(2, ActionSpace::discrete(3), &uniform).unwrap();
        assert!(learner
            .q_network()
            .layers
            .iter()
            .flat_map(|layer| layer.weights.iter())
            .all(|w| (-0.1..0.1).contains(w)));
    }
}
