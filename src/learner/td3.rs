use log::debug;
use ndarray::{s, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    build_network, check_gamma, check_learning_rate, check_state, n_step_target, rollouts, stack_states, LearnStats,
    Mlp, PolicyLearner, TargetUpdate,
};
use crate::activations::Activation;
use crate::error::{MetisError, Result};
use crate::exploration::ActionScores;
use crate::layers::WeightInit;
use crate::network::{FunctionApproximator, NeuralNetwork};
use crate::optimizer::{GradientClipper, OptimizerConfig};
use crate::replay_buffer::Batch;
use crate::types::{Action, ActionSpace, StateRepr};

/// Configuration of [Td3Learner].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Td3Config {
    pub hidden_sizes: Vec<usize>,
    pub hidden_activation: Activation,
    pub weight_init: Option<WeightInit>,
    pub actor_learning_rate: f32,
    pub critic_learning_rate: f32,
    pub gamma: f32,
    /// Applied to the actor and both critics on every actor update
    pub target_update: TargetUpdate,
    /// Critic updates per actor update
    pub policy_delay: usize,
    /// Std of the target policy smoothing noise, in units of half the action range
    pub policy_noise: f32,
    pub noise_clip: f32,
    pub optimizer: OptimizerConfig,
    pub seed: u64,
}

impl Default for Td3Config {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![256, 256],
            hidden_activation: Activation::Relu,
            weight_init: None,
            actor_learning_rate: 1e-3,
            critic_learning_rate: 1e-3,
            gamma: 0.99,
            target_update: TargetUpdate::Soft { tau: 0.005 },
            policy_delay: 2,
            policy_noise: 0.2,
            noise_clip: 0.5,
            optimizer: OptimizerConfig::default(),
            seed: 42,
        }
    }
}

impl Td3Config {
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

    pub fn learning_rates(mut self, actor: f32, critic: f32) -> Self {
        self.actor_learning_rate = actor;
        self.critic_learning_rate = critic;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn target_update(mut self, target_update: TargetUpdate) -> Self {
        self.target_update = target_update;
        self
    }

    pub fn policy_delay(mut self, policy_delay: usize) -> Self {
        self.policy_delay = policy_delay;
        self
    }

    pub fn noise_params(mut self, policy_noise: f32, noise_clip: f32) -> Self {
        self.policy_noise = policy_noise;
        self.noise_clip = noise_clip;
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

/// Twin delayed deterministic policy gradient for continuous actions.
///
/// The actor ends in `tanh` and its output is mapped affinely onto the
/// action box, so proposals always lie inside the space. Two critics score
/// `(state, action)` pairs and the bootstrap uses the smaller of their target
/// estimates at a noise-smoothed target action. The actor ascends the first
/// critic every `policy_delay` learning steps, and the target networks move
/// only on those steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Td3Learner<N = NeuralNetwork> {
    actor: N,
    actor_target: N,
    critic1: N,
    critic2: N,
    critic1_target: N,
    critic2_target: N,
    action_space: ActionSpace,
    /// Box center and half-width
    center: Array1<f32>,
    half_range: Array1<f32>,
    state_dim: usize,
    actor_learning_rate: f32,
    critic_learning_rate: f32,
    gamma: f32,
    target_update: TargetUpdate,
    policy_delay: usize,
    policy_noise: f32,
    noise_clip: f32,
    rng: ChaCha8Rng,
    learn_steps: usize,
    actor_updates: usize,
}

/// Center and half-width of a bounded continuous space
fn action_box(space: &ActionSpace) -> Result<(Array1<f32>, Array1<f32>)> {
    match space {
        ActionSpace::Continuous { low, high } => {
            space.validate()?;
            if low.iter().chain(high.iter()).any(|b| !b.is_finite()) {
                return Err(MetisError::invalid_parameter(
                    "action_space",
                    "TD3 needs finite action bounds",
                ));
            }
            Ok(((low + high) / 2.0, (high - low) / 2.0))
        }
        ActionSpace::Discrete { .. } => Err(MetisError::UnsupportedOperation(
            "TD3 needs a continuous action space".to_string(),
        )),
    }
}

impl Td3Learner<NeuralNetwork> {
    pub fn new(state_dim: usize, action_space: ActionSpace, config: &Td3Config) -> Result<Self> {
        let (center, _) = action_box(&action_space)?;
        let action_dim = center.len();
        let hidden = Mlp::new(&config.hidden_sizes, config.hidden_activation, config.weight_init);
        let actor = build_network(
            state_dim,
            action_dim,
            &Mlp::new(&config.hidden_sizes, config.hidden_activation, config.weight_init)
                .output_activation(Activation::Tanh),
            &config.optimizer,
            GradientClipper::None,
            config.seed,
        );
        let critic = |offset: u64| {
            build_network(
                state_dim + action_dim,
                1,
                &hidden,
                &config.optimizer,
                GradientClipper::None,
                config.seed.wrapping_add(offset),
            )
        };
        Self::from_networks(actor, critic(1), critic(2), action_space, config)
    }
}

impl<N: FunctionApproximator> Td3Learner<N> {
    /// Wrap existing networks: an actor from states to `tanh` outputs, and
    /// two critics from `(state, action)` to one value. Targets start as copies.
    pub fn from_networks(actor: N, critic1: N, critic2: N, action_space: ActionSpace, config: &Td3Config) -> Result<Self> {
        let (center, half_range) = action_box(&action_space)?;
        check_gamma(config.gamma)?;
        check_learning_rate(config.actor_learning_rate)?;
        check_learning_rate(config.critic_learning_rate)?;
        config.target_update.validate()?;
        if config.policy_delay == 0 {
            return Err(MetisError::invalid_parameter("policy_delay", "must be positive"));
        }
        if !(config.policy_noise.is_finite() && config.policy_noise >= 0.0 && config.noise_clip >= 0.0) {
            return Err(MetisError::invalid_parameter(
                "policy_noise",
                format!(
                    "noise scale and clip must be non-negative, got {} and {}",
                    config.policy_noise, config.noise_clip
                ),
            ));
        }

        let state_dim = actor.input_dim();
        let action_dim = center.len();
        if actor.output_dim() != action_dim {
            return Err(MetisError::dimension_mismatch(
                format!("actor with {} outputs", action_dim),
                format!("actor with {} outputs", actor.output_dim()),
            ));
        }
        for critic in [&critic1, &critic2] {
            if critic.input_dim() != state_dim + action_dim || critic.output_dim() != 1 {
                return Err(MetisError::dimension_mismatch(
                    format!("critic {} -> 1", state_dim + action_dim),
                    format!("critic {} -> {}", critic.input_dim(), critic.output_dim()),
                ));
            }
        }

        Ok(Self {
            actor_target: actor.clone(),
            critic1_target: critic1.clone(),
            critic2_target: critic2.clone(),
            actor,
            critic1,
            critic2,
            action_space,
            center,
            half_range,
            state_dim,
            actor_learning_rate: config.actor_learning_rate,
            critic_learning_rate: config.critic_learning_rate,
            gamma: config.gamma,
            target_update: config.target_update.clone(),
            policy_delay: config.policy_delay,
            policy_noise: config.policy_noise,
            noise_clip: config.noise_clip,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            learn_steps: 0,
            actor_updates: 0,
        })
    }

    /// Smaller of the two critic estimates for `(state, action)`
    pub fn q_value(&self, state: &StateRepr, action: &Array1<f32>) -> Result<f32> {
        check_state(state, self.state_dim)?;
        if action.len() != self.center.len() {
            return Err(MetisError::dimension_mismatch(
                format!("action of length {}", self.center.len()),
                format!("action of length {}", action.len()),
            ));
        }
        let mut input = Array1::zeros(self.state_dim + action.len());
        input.slice_mut(s![..self.state_dim]).assign(state);
        input.slice_mut(s![self.state_dim..]).assign(action);
        let q1 = self.critic1.forward(input.view())[0];
        let q2 = self.critic2.forward(input.view())[0];
        Ok(q1.min(q2))
    }

    /// Number of actor (and target) updates so far
    pub fn actor_updates(&self) -> usize {
        self.actor_updates
    }

    /// Map `tanh` outputs row-wise onto the action box
    fn scale(&self, squashed: &Array2<f32>) -> Array2<f32> {
        squashed * &self.half_range + &self.center
    }

    /// Rows of `[state, action]`
    fn critic_inputs(&self, states: &Array2<f32>, actions: &Array2<f32>) -> Array2<f32> {
        let mut inputs = Array2::zeros((states.nrows(), self.state_dim + actions.ncols()));
        inputs.slice_mut(s![.., ..self.state_dim]).assign(states);
        inputs.slice_mut(s![.., self.state_dim..]).assign(actions);
        inputs
    }

    fn stored_actions(&self, batch_actions: &[&Action]) -> Result<Array2<f32>> {
        let action_dim = self.center.len();
        let mut actions = Array2::zeros((batch_actions.len(), action_dim));
        for (row, action) in batch_actions.iter().enumerate() {
            match action.to_continuous() {
                Some(values) if values.len() == action_dim => actions.row_mut(row).assign(values),
                _ => {
                    return Err(MetisError::ActionSpaceViolation(format!(
                        "stored action {} is not a {}-dimensional continuous action",
                        action, action_dim
                    )))
                }
            }
        }
        Ok(actions)
    }

    /// Target actions at `next_states` with clipped smoothing noise
    fn smoothed_target_actions(&mut self, next_states: &Array2<f32>) -> Result<Array2<f32>> {
        let mut squashed = self.actor_target.forward_batch(next_states.view());
        if self.policy_noise > 0.0 {
            let normal = Normal::new(0.0, self.policy_noise)
                .map_err(|e| MetisError::invalid_parameter("policy_noise", e.to_string()))?;
            let clip = self.noise_clip;
            for value in squashed.iter_mut() {
                let noise: f32 = self.rng.sample(normal);
                *value = (*value + noise.clamp(-clip, clip)).clamp(-1.0, 1.0);
            }
        }
        Ok(self.scale(&squashed))
    }

    /// Ascend `Q1(s, pi(s))`; returns the actor loss `-mean Q1`
    fn update_actor(&mut self, states: &Array2<f32>) -> Result<f32> {
        let rows = states.nrows() as f32;
        let actions = self.scale(&self.actor.forward_batch(states.view()));
        let inputs = self.critic_inputs(states, &actions);
        let q = self.critic1.forward_batch(inputs.view());
        let loss_gradient = Array2::from_elem(q.dim(), -1.0 / rows);
        let input_gradients = self.critic1.input_gradients(inputs.view(), loss_gradient.view());
        // dL/d tanh output = dL/da * half range
        let actor_gradients = &input_gradients.slice(s![.., self.state_dim..]) * &self.half_range;
        self.actor
            .update(states.view(), actor_gradients.view(), self.actor_learning_rate);
        self.actor_updates += 1;

        if let Some(tau) = self.target_update.tau_at(self.actor_updates) {
            self.actor_target.soft_update_from(&self.actor, tau)?;
            self.critic1_target.soft_update_from(&self.critic1, tau)?;
            self.critic2_target.soft_update_from(&self.critic2, tau)?;
            if tau >= 1.0 {
                debug!("TD3 target networks refreshed at actor update {}", self.actor_updates);
            }
        }
        Ok(-q.mean().unwrap_or(0.0))
    }
}

impl<N: FunctionApproximator> PolicyLearner for Td3Learner<N> {
    /// The scores are the proposed action itself
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        check_state(state, self.state_dim)?;
        let squashed = self.actor.forward(state.view());
        Ok(ActionScores::new(squashed * &self.half_range + &self.center))
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        let rollouts = rollouts(batch)?;
        let actions = self.stored_actions(&rollouts.iter().map(|r| r.first.action()).collect::<Vec<_>>())?;
        let states = stack_states(rollouts.iter().map(|r| r.first.state_before()), self.state_dim)?;
        let next_states = stack_states(rollouts.iter().map(|r| r.last_state), self.state_dim)?;

        let next_actions = self.smoothed_target_actions(&next_states)?;
        let next_inputs = self.critic_inputs(&next_states, &next_actions);
        let target_q1 = self.critic1_target.forward_batch(next_inputs.view());
        let target_q2 = self.critic2_target.forward_batch(next_inputs.view());

        let inputs = self.critic_inputs(&states, &actions);
        let q1 = self.critic1.forward_batch(inputs.view());
        let q2 = self.critic2.forward_batch(inputs.view());

        let rows = rollouts.len() as f32;
        let mut gradients1 = Array2::zeros((rollouts.len(), 1));
        let mut gradients2 = Array2::zeros((rollouts.len(), 1));
        let mut td_errors = Vec::with_capacity(rollouts.len());
        let mut critic_loss = 0.0;
        for (i, rollout) in rollouts.iter().enumerate() {
            let bootstrap = target_q1[[i, 0]].min(target_q2[[i, 0]]);
            let target = n_step_target(&rollout.rewards, self.gamma, bootstrap, rollout.terminated);
            let weight = batch.weight(i);
            let (e1, e2) = (q1[[i, 0]] - target, q2[[i, 0]] - target);
            critic_loss += weight * 0.5 * (e1 * e1 + e2 * e2) / rows;
            gradients1[[i, 0]] = weight * e1 / rows;
            gradients2[[i, 0]] = weight * e2 / rows;
            td_errors.push(e1.abs());
        }

        self.critic1
            .update(inputs.view(), gradients1.view(), self.critic_learning_rate);
        self.critic2
            .update(inputs.view(), gradients2.view(), self.critic_learning_rate);
        self.learn_steps += 1;

        let mut extra = BTreeMap::new();
        extra.insert("critic_loss".to_string(), critic_loss);
        let mut loss = critic_loss;
        if self.learn_steps % self.policy_delay == 0 {
            let actor_loss = self.update_actor(&states)?;
            extra.insert("actor_loss".to_string(), actor_loss);
            loss += actor_loss;
        }

        Ok(LearnStats {
            loss,
            value_estimate: q1.mean(),
            td_errors,
            extra,
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
    use crate::types::Transition;
    use ndarray::array;

    fn space() -> ActionSpace {
        ActionSpace::continuous(array![-1.0], array![1.0])
    }

    fn config() -> Td3Config {
        Td3Config::default()
            .hidden_sizes(&[32])
            .learning_rates(0.01, 0.01)
            .seed(9)
    }

    /// One-step episode on a constant state, reward peaks at action 0.5
    fn pull(action: f32) -> Transition {
        let reward = -(action - 0.5) * (action - 0.5);
        Transition::new(array![1.0], Action::Continuous(array![action]), reward, array![1.0], true, false)
    }

    #[test]
    fn test_proposals_stay_inside_the_box() {
        let space = ActionSpace::continuous(array![-2.0, 10.0], array![2.0, 20.0]);
        let learner = Td3Learner::new(3, space.clone(), &config()).unwrap();
        for state in [array![0.0, 0.0, 0.0], array![100.0, -100.0, 50.0]] {
            let proposal = learner.act(&state).unwrap().values;
            assert!(space.contains(&Action::Continuous(proposal)));
        }
    }

    #[test]
    fn test_rejects_discrete_and_unbounded_spaces() {
        assert!(matches!(
            Td3Learner::new(1, ActionSpace::discrete(2), &config()),
            Err(MetisError::UnsupportedOperation(_))
        ));
        let unbounded = ActionSpace::continuous(array![f32::NEG_INFINITY], array![1.0]);
        assert!(Td3Learner::new(1, unbounded, &config()).is_err());
        assert!(Td3Learner::new(1, space(), &config().policy_delay(0)).is_err());
    }

    #[test]
    fn test_actor_updates_are_delayed() {
        let mut learner = Td3Learner::new(1, space(), &config().policy_delay(3)).unwrap();
        let batch = Batch::from_transitions(vec![pull(0.0), pull(1.0)]);
        for _ in 0..2 {
            let stats = learner.learn_batch(&batch).unwrap();
            assert!(!stats.extra.contains_key("actor_loss"));
        }
        let stats = learner.learn_batch(&batch).unwrap();
        assert!(stats.extra.contains_key("actor_loss"));
        assert_eq!(learner.actor_updates(), 1);
        assert_eq!(stats.td_errors.len(), 2);
    }

    #[test]
    fn test_rejects_discrete_stored_actions() {
        let mut learner = Td3Learner::new(1, space(), &config()).unwrap();
        let batch = Batch::from_transitions(vec![Transition::new(
            array![1.0],
            Action::Discrete(0),
            1.0,
            array![1.0],
            true,
            false,
        )]);
        assert!(matches!(learner.learn_batch(&batch), Err(MetisError::ActionSpaceViolation(_))));
        assert_eq!(learner.learn_steps(), 0);
    }

    #[test]
    fn test_actor_climbs_towards_the_best_action() {
        let mut learner = Td3Learner::new(1, space(), &config()).unwrap();
        let batch = Batch::from_transitions((0..9).map(|i| pull(-1.0 + 0.25 * i as f32)).collect());
        let state = array![1.0];
        for _ in 0..1500 {
            learner.learn_batch(&batch).unwrap();
        }
        let after = learner.act(&state).unwrap().values[0];
        assert!((after - 0.5).abs() < 0.2, "actor settled at {}", after);
        assert!(learner.q_value(&state, &array![0.5]).unwrap() > learner.q_value(&state, &array![-1.0]).unwrap());
    }
}
