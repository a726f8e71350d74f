//! # Metis - Modular Online Reinforcement Learning Agent Core
//!
//! Metis assembles an online RL agent from interchangeable parts that an
//! external environment drives by exchanging observations, actions and
//! rewards. Each part is a trait with several bundled implementations, and
//! each bundled set can be picked from a serde config.
//!
//! ## Key Features
//!
//! - **Experience stores**: FIFO, proportional prioritized (sum tree) and
//!   episode-respecting sequential replay
//! - **History summarizers**: identity, observation stacking, recurrent fold
//! - **Exploration**: greedy, epsilon-greedy, Gaussian and Ornstein-Uhlenbeck
//!   noise, UCB, Thompson sampling, propensity sampling
//! - **Learners**: DQN (double, n-step, Huber), advantage actor-critic,
//!   disjoint linear and neural contextual bandits, TD3 for continuous
//!   action boxes
//! - **Safety**: action masks and bounds with clamp or reject semantics
//! - **Checkpoints**: bincode snapshots including RNG state
//!
//! ## Quick Start
//!
//! ```rust
//! use metis::agent::{AgentConfig, AgentSettings};
//! use metis::types::ActionSpace;
//! use ndarray::array;
//!
//! let config = AgentConfig::new(3, ActionSpace::discrete(2))
//!     .settings(AgentSettings::default().batch_size(16));
//! let mut agent = config.build().unwrap();
//!
//! let mut observation = array![0.0, 0.0, 0.0];
//! for step in 0..20 {
//!     let action = agent.act(&observation).unwrap();
//!     let next = array![step as f32, 1.0, -1.0];
//!     let done = step % 10 == 9;
//!     agent.observe(&action, 1.0, &next, done, false).unwrap();
//!     observation = if done { array![0.0, 0.0, 0.0] } else { next };
//! }
//! assert_eq!(agent.metrics().episode_count(), 2);
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - The orchestrator, its config and checkpoints
//! - [`replay_buffer`] - Experience stores and batches
//! - [`history`] - Observation history summarizers
//! - [`exploration`] - Action selection strategies
//! - [`learner`] - Policy learners and the function approximator seam
//! - [`safety`] - Action filters
//! - [`env`] - Environment interface and episode runner
//! - [`metrics`] - Training metrics and tracking
//! - [`network`], [`layers`], [`activations`], [`optimizer`] - The bundled dense network
//! - [`types`] - Actions, action spaces and transitions
//! - [`error`] - Error types and result handling

pub mod activations;
pub mod agent;
pub mod env;
pub mod error;
pub mod exploration;
pub mod history;
pub mod layers;
pub mod learner;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod replay_buffer;
pub mod safety;
pub mod types;

#[cfg(test)]
mod tests;
