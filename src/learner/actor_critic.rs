use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    build_network, check_gamma, check_learning_rate, check_state, discrete_actions, discrete_index, n_step_target,
    rollouts, softmax, stack_states, LearnStats, Mlp, PolicyLearner, TargetUpdate,
};
use crate::activations::Activation;
use crate::error::Result;
use crate::exploration::ActionScores;
use crate::layers::WeightInit;
use crate::network::{FunctionApproximator, NeuralNetwork};
use crate::optimizer::{GradientClipper, OptimizerConfig};
use crate::replay_buffer::Batch;
use crate::types::{ActionSpace, StateRepr};

/// Configuration of [ActorCriticLearner].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorCriticConfig {
    pub hidden_sizes: Vec<usize>,
    pub hidden_activation: Activation,
    pub weight_init: Option<WeightInit>,
    pub actor_learning_rate: f32,
    pub critic_learning_rate: f32,
    pub gamma: f32,
    /// Weight of the entropy bonus in the actor loss
    pub entropy_coeff: f32,
    /// Global gradient norm limit for both networks
    pub max_grad_norm: Option<f32>,
    pub target_update: TargetUpdate,
    pub optimizer: OptimizerConfig,
    pub seed: u64,
}

impl Default for ActorCriticConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![64, 64],
            hidden_activation: Activation::Relu,
            weight_init: None,
            actor_learning_rate: 1e-3,
            critic_learning_rate: 1e-3,
            gamma: 0.99,
            entropy_coeff: 0.01,
            max_grad_norm: Some(0.5),
            target_update: TargetUpdate::Soft { tau: 0.005 },
            optimizer: OptimizerConfig::default(),
            seed: 42,
        }
    }
}

impl ActorCriticConfig {
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

    pub fn entropy_coeff(mut self, entropy_coeff: f32) -> Self {
        self.entropy_coeff = entropy_coeff;
        self
    }

    pub fn max_grad_norm(mut self, max_grad_norm: Option<f32>) -> Self {
        self.max_grad_norm = max_grad_norm;
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

/// Advantage actor-critic for discrete actions.
///
/// The actor outputs logits; [`act`](PolicyLearner::act) returns the softmax
/// probabilities, meant for [`Propensity`](crate::exploration::Propensity) or
/// greedy selection. The critic regresses `V(s)` onto n-step targets
/// bootstrapped from a slowly moving target critic, and the advantage
/// `target - V(s)` weights the policy gradient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorCriticLearner<N = NeuralNetwork> {
    actor: N,
    critic: N,
    target_critic: N,
    action_space: ActionSpace,
    actor_learning_rate: f32,
    critic_learning_rate: f32,
    gamma: f32,
    entropy_coeff: f32,
    target_update: TargetUpdate,
    learn_steps: usize,
}

impl ActorCriticLearner<NeuralNetwork> {
    pub fn new(state_dim: usize, action_space: ActionSpace, config: &ActorCriticConfig) -> Result<Self> {
        let n_actions = discrete_actions(&action_space, "actor-critic")?;
        let clipper = match config.max_grad_norm {
            Some(max_norm) => GradientClipper::ClipByGlobalNorm { max_norm },
            None => GradientClipper::None,
        };
        let mlp = Mlp::new(&config.hidden_sizes, config.hidden_activation, config.weight_init);
        let actor = build_network(
            state_dim,
            n_actions,
            &mlp,
            &config.optimizer,
            clipper.clone(),
            config.seed,
        );
        let critic = build_network(
            state_dim,
            1,
            &mlp,
            &config.optimizer,
            clipper,
            config.seed.wrapping_add(1),
        );
        Self::from_networks(actor, critic, action_space, config)
    }
}

impl<N: FunctionApproximator> ActorCriticLearner<N> {
    pub fn from_networks(actor: N, critic: N, action_space: ActionSpace, config: &ActorCriticConfig) -> Result<Self> {
        discrete_actions(&action_space, "actor-critic")?;
        check_gamma(config.gamma)?;
        check_learning_rate(config.actor_learning_rate)?;
        check_learning_rate(config.critic_learning_rate)?;
        config.target_update.validate()?;
        Ok(Self {
            target_critic: critic.clone(),
            actor,
            critic,
            action_space,
            actor_learning_rate: config.actor_learning_rate,
            critic_learning_rate: config.critic_learning_rate,
            gamma: config.gamma,
            entropy_coeff: config.entropy_coeff,
            target_update: config.target_update.clone(),
            learn_steps: 0,
        })
    }

    /// Critic estimate of `V(state)`
    pub fn value(&self, state: &StateRepr) -> Result<f32> {
        check_state(state, self.critic.input_dim())?;
        Ok(self.critic.forward(state.view())[0])
    }
}

fn entropy(probs: &Array1<f32>) -> f32 {
    -probs.iter().filter(|&&p| p > 0.0).map(|&p| p * p.ln()).sum::<f32>()
}

impl<N: FunctionApproximator> PolicyLearner for ActorCriticLearner<N> {
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        check_state(state, self.actor.input_dim())?;
        Ok(ActionScores::new(softmax(&self.actor.forward(state.view()))))
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        let rollouts = rollouts(batch)?;
        let n_actions = self.action_space.dim();
        let state_dim = self.critic.input_dim();
        let actions = rollouts
            .iter()
            .map(|r| discrete_index(r.first.action(), n_actions))
            .collect::<Result<Vec<_>>>()?;
        let states = stack_states(rollouts.iter().map(|r| r.first.state_before()), state_dim)?;
        let next_states = stack_states(rollouts.iter().map(|r| r.last_state), state_dim)?;

        let values = self.critic.forward_batch(states.view());
        let bootstrap = self.target_critic.forward_batch(next_states.view());
        let logits = self.actor.forward_batch(states.view());

        let batch_size = rollouts.len() as f32;
        let mut critic_gradients = Array2::zeros(values.dim());
        let mut actor_gradients = Array2::zeros(logits.dim());
        let mut td_errors = Vec::with_capacity(rollouts.len());
        let (mut critic_loss, mut actor_loss, mut entropy_sum, mut value_sum) = (0.0, 0.0, 0.0, 0.0);

        for (i, rollout) in rollouts.iter().enumerate() {
            let weight = batch.weight(i);
            let value = values[[i, 0]];
            let target = n_step_target(&rollout.rewards, self.gamma, bootstrap[[i, 0]], rollout.terminated);
            let advantage = target - value;

            critic_loss += weight * 0.5 * advantage * advantage / batch_size;
            critic_gradients[[i, 0]] = -weight * advantage / batch_size;

            // d/dz of -A log pi(a) - c H(pi) for softmax logits z
            let probs = softmax(&logits.row(i).to_owned());
            let h = entropy(&probs);
            let a = actions[i];
            actor_loss += weight * (-advantage * probs[a].max(f32::MIN_POSITIVE).ln() - self.entropy_coeff * h) / batch_size;
            for j in 0..n_actions {
                let indicator = if j == a { 1.0 } else { 0.0 };
                let log_p = probs[j].max(f32::MIN_POSITIVE).ln();
                let policy_term = advantage * (probs[j] - indicator);
                let entropy_term = self.entropy_coeff * probs[j] * (log_p + h);
                actor_gradients[[i, j]] = weight * (policy_term + entropy_term) / batch_size;
            }

            td_errors.push(advantage.abs());
            entropy_sum += h;
            value_sum += value;
        }

        self.critic
            .update(states.view(), critic_gradients.view(), self.critic_learning_rate);
        self.actor
            .update(states.view(), actor_gradients.view(), self.actor_learning_rate);
        self.learn_steps += 1;

        if let Some(tau) = self.target_update.tau_at(self.learn_steps) {
            self.target_critic.soft_update_from(&self.critic, tau)?;
            if tau >= 1.0 {
                debug!("Target critic refreshed at learn step {}", self.learn_steps);
            }
        }

        let mut extra = BTreeMap::new();
        extra.insert("actor_loss".to_string(), actor_loss);
        extra.insert("critic_loss".to_string(), critic_loss);
        extra.insert("entropy".to_string(), entropy_sum / batch_size);

        Ok(LearnStats {
            loss: actor_loss + critic_loss,
            value_estimate: Some(value_sum / batch_size),
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
