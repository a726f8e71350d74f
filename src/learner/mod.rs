//! # Policy Learners
//!
//! A policy learner scores actions for a state and improves itself from
//! sampled batches of experience. Scoring is pure; all mutation happens in
//! [`PolicyLearner::learn_batch`].
//!
//! ## Available Learners
//!
//! - [`DqnLearner`]: value-based, Q-network plus target network, optional
//!   double DQN, n-step targets on sequence batches
//! - [`ActorCriticLearner`]: softmax actor with a state-value critic
//! - [`LinearBanditLearner`]: disjoint LinUCB contextual bandit with
//!   uncertainty estimates for UCB and Thompson exploration
//! - [`DeepBanditLearner`]: contextual bandit with a neural reward model
//! - [`Td3Learner`]: deterministic actor and twin critics for continuous
//!   action boxes
//!
//! Networks are reached through [`FunctionApproximator`](crate::network::FunctionApproximator);
//! the bundled [`NeuralNetwork`] is the default.

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activations::Activation;
use crate::error::{MetisError, Result};
use crate::exploration::ActionScores;
use crate::layers::{DenseLayer, WeightInit};
use crate::network::NeuralNetwork;
use crate::optimizer::{GradientClipper, OptimizerConfig};
use crate::replay_buffer::{Batch, BatchItems};
use crate::types::{Action, ActionSpace, StateRepr, Transition};

pub mod actor_critic;
pub mod deep_bandit;
pub mod dqn;
pub mod linear_bandit;
pub mod returns;
pub mod td3;

pub use actor_critic::{ActorCriticConfig, ActorCriticLearner};
pub use deep_bandit::{DeepBanditConfig, DeepBanditLearner};
pub use dqn::{DqnConfig, DqnLearner, TdLoss};
pub use linear_bandit::{LinearBanditConfig, LinearBanditLearner};
pub use returns::{discounted_return, n_step_target};
pub use td3::{Td3Config, Td3Learner};

/// Diagnostics from one learning step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnStats {
    pub loss: f32,
    pub value_estimate: Option<f32>,
    /// Absolute TD error per batch item, aligned with `Batch::indices`
    pub td_errors: Vec<f32>,
    pub extra: BTreeMap<String, f32>,
}

/// Scores actions and learns from batches
pub trait PolicyLearner {
    /// Score every action (discrete) or propose an action (continuous)
    fn act(&self, state: &StateRepr) -> Result<ActionScores>;

    /// One update from `batch`; an empty batch is an `EmptyBatch` error
    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats>;

    fn action_space(&self) -> &ActionSpace;

    /// Number of successful `learn_batch` calls
    fn learn_steps(&self) -> usize;
}

/// How target parameters follow the online parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetUpdate {
    /// Copy every `every` learning steps
    Hard { every: usize },
    /// Polyak averaging after every learning step
    Soft { tau: f32 },
}

impl Default for TargetUpdate {
    fn default() -> Self {
        TargetUpdate::Hard { every: 100 }
    }
}

impl TargetUpdate {
    pub(crate) fn validate(&self) -> Result<()> {
        match *self {
            TargetUpdate::Hard { every } if every == 0 => {
                Err(MetisError::invalid_parameter("target_update", "hard update period must be positive"))
            }
            TargetUpdate::Soft { tau } if !(tau > 0.0 && tau <= 1.0) => Err(MetisError::invalid_parameter(
                "target_update",
                format!("tau must be in (0, 1], got {}", tau),
            )),
            _ => Ok(()),
        }
    }

    /// Blend factor to apply after learning step `step`, if any
    pub(crate) fn tau_at(&self, step: usize) -> Option<f32> {
        match *self {
            TargetUpdate::Hard { every } => (step % every == 0).then(|| 1.0),
            TargetUpdate::Soft { tau } => Some(tau),
        }
    }
}

pub(crate) fn check_gamma(gamma: f32) -> Result<()> {
    if (0.0..1.0).contains(&gamma) {
        Ok(())
    } else {
        Err(MetisError::invalid_parameter(
            "gamma",
            format!("discount factor must be in [0, 1), got {}", gamma),
        ))
    }
}

pub(crate) fn check_learning_rate(learning_rate: f32) -> Result<()> {
    if learning_rate.is_finite() && learning_rate > 0.0 {
        Ok(())
    } else {
        Err(MetisError::invalid_parameter(
            "learning_rate",
            format!("must be positive, got {}", learning_rate),
        ))
    }
}

pub(crate) fn check_state(state: &StateRepr, dim: usize) -> Result<()> {
    if state.len() != dim {
        return Err(MetisError::dimension_mismatch(
            format!("state of length {}", dim),
            format!("state of length {}", state.len()),
        ));
    }
    Ok(())
}

pub(crate) fn discrete_actions(space: &ActionSpace, learner: &str) -> Result<usize> {
    match space {
        ActionSpace::Discrete { n } if *n > 0 => Ok(*n),
        _ => Err(MetisError::UnsupportedOperation(format!(
            "{} needs a non-empty discrete action space",
            learner
        ))),
    }
}

pub(crate) fn discrete_index(action: &Action, n: usize) -> Result<usize> {
    match action.to_discrete() {
        Some(index) if index < n => Ok(index),
        _ => Err(MetisError::ActionSpaceViolation(format!(
            "stored action {} is not one of {} discrete actions",
            action, n
        ))),
    }
}

/// Layout of a bundled dense network
pub(crate) struct Mlp<'a> {
    pub hidden: &'a [usize],
    pub activation: Activation,
    pub output_activation: Activation,
    /// Per-activation default when unset
    pub weight_init: Option<WeightInit>,
}

impl<'a> Mlp<'a> {
    /// Hidden layers with `activation`, linear output
    pub fn new(hidden: &'a [usize], activation: Activation, weight_init: Option<WeightInit>) -> Self {
        Self {
            hidden,
            activation,
            output_activation: Activation::Linear,
            weight_init,
        }
    }

    pub fn output_activation(mut self, activation: Activation) -> Self {
        self.output_activation = activation;
        self
    }
}

pub(crate) fn build_network(
    input: usize,
    output: usize,
    mlp: &Mlp<'_>,
    optimizer: &OptimizerConfig,
    clipper: GradientClipper,
    seed: u64,
) -> NeuralNetwork {
    let mut sizes = Vec::with_capacity(mlp.hidden.len() + 2);
    sizes.push(input);
    sizes.extend_from_slice(mlp.hidden);
    sizes.push(output);
    let mut activations = vec![mlp.activation; mlp.hidden.len()];
    activations.push(mlp.output_activation);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let layers = sizes
        .windows(2)
        .zip(activations)
        .map(|(window, activation)| {
            let init = mlp.weight_init.unwrap_or_else(|| WeightInit::for_activation(activation));
            DenseLayer::with_init(window[0], window[1], activation, init, &mut rng)
        })
        .collect();
    NeuralNetwork::from_layers(layers, optimizer.build()).with_clipper(clipper)
}

/// A batch item reduced to what a bootstrapped target needs
pub(crate) struct Rollout<'a> {
    pub first: &'a Transition,
    pub rewards: Vec<f32>,
    /// State to bootstrap from
    pub last_state: &'a StateRepr,
    pub terminated: bool,
}

/// One rollout per batch item: a single step for transition batches, the
/// real steps of each sequence for sequence batches
pub(crate) fn rollouts(batch: &Batch) -> Result<Vec<Rollout<'_>>> {
    if batch.is_empty() {
        return Err(MetisError::EmptyBatch("learn_batch called with no items".to_string()));
    }
    match batch.items() {
        BatchItems::Transitions(transitions) => Ok(transitions
            .iter()
            .map(|t| Rollout {
                first: t,
                rewards: vec![t.reward()],
                last_state: t.state_after(),
                terminated: t.terminated(),
            })
            .collect()),
        BatchItems::Sequences(sequences) => sequences
            .iter()
            .map(|sequence| {
                let steps: Vec<&Transition> = sequence.valid_steps().collect();
                match (steps.first(), steps.last()) {
                    (Some(first), Some(last)) => Ok(Rollout {
                        first,
                        rewards: steps.iter().map(|t| t.reward()).collect(),
                        last_state: last.state_after(),
                        terminated: last.terminated(),
                    }),
                    _ => Err(MetisError::EmptyBatch("sequence without real steps".to_string())),
                }
            })
            .collect(),
    }
}

/// Stack states into a `(rows, dim)` matrix, checking each length
pub(crate) fn stack_states<'a, I>(states: I, dim: usize) -> Result<Array2<f32>>
where
    I: IntoIterator<Item = &'a StateRepr>,
{
    let rows: Vec<&Array1<f32>> = states.into_iter().collect();
    let mut stacked = Array2::zeros((rows.len(), dim));
    for (i, state) in rows.into_iter().enumerate() {
        check_state(state, dim)?;
        stacked.row_mut(i).assign(state);
    }
    Ok(stacked)
}

pub(crate) fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|z| (z - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Learner selection, tagged by `kind` in config files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerConfig {
    Dqn(DqnConfig),
    ActorCritic(ActorCriticConfig),
    LinearBandit(LinearBanditConfig),
    DeepBandit(DeepBanditConfig),
    Td3(Td3Config),
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig::Dqn(DqnConfig::default())
    }
}

impl LearnerConfig {
    pub fn build(&self, state_dim: usize, action_space: &ActionSpace) -> Result<LearnerWrapper> {
        Ok(match self {
            LearnerConfig::Dqn(config) => LearnerWrapper::Dqn(DqnLearner::new(state_dim, action_space.clone(), config)?),
            LearnerConfig::ActorCritic(config) => {
                LearnerWrapper::ActorCritic(ActorCriticLearner::new(state_dim, action_space.clone(), config)?)
            }
            LearnerConfig::LinearBandit(config) => {
                LearnerWrapper::LinearBandit(LinearBanditLearner::new(state_dim, action_space.clone(), config)?)
            }
            LearnerConfig::DeepBandit(config) => {
                LearnerWrapper::DeepBandit(DeepBanditLearner::new(state_dim, action_space.clone(), config)?)
            }
            LearnerConfig::Td3(config) => LearnerWrapper::Td3(Td3Learner::new(state_dim, action_space.clone(), config)?),
        })
    }
}

/// Any of the bundled learners
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LearnerWrapper {
    Dqn(DqnLearner),
    ActorCritic(ActorCriticLearner),
    LinearBandit(LinearBanditLearner),
    DeepBandit(DeepBanditLearner),
    Td3(Td3Learner),
}

impl PolicyLearner for LearnerWrapper {
    fn act(&self, state: &StateRepr) -> Result<ActionScores> {
        match self {
            LearnerWrapper::Dqn(learner) => learner.act(state),
            LearnerWrapper::ActorCritic(learner) => learner.act(state),
            LearnerWrapper::LinearBandit(learner) => learner.act(state),
            LearnerWrapper::DeepBandit(learner) => learner.act(state),
            LearnerWrapper::Td3(learner) => learner.act(state),
        }
    }

    fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
        match self {
            LearnerWrapper::Dqn(learner) => learner.learn_batch(batch),
            LearnerWrapper::ActorCritic(learner) => learner.learn_batch(batch),
            LearnerWrapper::LinearBandit(learner) => learner.learn_batch(batch),
            LearnerWrapper::DeepBandit(learner) => learner.learn_batch(batch),
            LearnerWrapper::Td3(learner) => learner.learn_batch(batch),
        }
    }

    fn action_space(&self) -> &ActionSpace {
        match self {
            LearnerWrapper::Dqn(learner) => learner.action_space(),
            LearnerWrapper::ActorCritic(learner) => learner.action_space(),
            LearnerWrapper::LinearBandit(learner) => learner.action_space(),
            LearnerWrapper::DeepBandit(learner) => learner.action_space(),
            LearnerWrapper::Td3(learner) => learner.action_space(),
        }
    }

    fn learn_steps(&self) -> usize {
        match self {
            LearnerWrapper::Dqn(learner) => learner.learn_steps(),
            LearnerWrapper::ActorCritic(learner) => learner.learn_steps(),
            LearnerWrapper::LinearBandit(learner) => learner.learn_steps(),
            LearnerWrapper::DeepBandit(learner) => learner.learn_steps(),
            LearnerWrapper::Td3(learner) => learner.learn_steps(),
        }
    }
}
