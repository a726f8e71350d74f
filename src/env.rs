//! Environment interface and a helper that runs one episode through an agent.

use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::Result;
use crate::exploration::ExplorationStrategy;
use crate::history::HistorySummarizer;
use crate::learner::PolicyLearner;
use crate::replay_buffer::ExperienceStore;
use crate::safety::SafetyModule;
use crate::types::{Action, ActionSpace};

/// Outcome of one environment step
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub observation: Array1<f32>,
    pub reward: f32,
    /// The episode reached a terminal state
    pub terminated: bool,
    /// The episode was cut short (time limit) in a non-terminal state
    pub truncated: bool,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// The world an agent interacts with
pub trait Environment {
    /// Start a new episode and return its first observation
    fn reset(&mut self) -> Array1<f32>;

    fn step(&mut self, action: &Action) -> Result<StepResult>;

    fn action_space(&self) -> ActionSpace;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub total_reward: f32,
    pub terminated: bool,
    /// Cut short by the environment or by `max_steps`
    pub truncated: bool,
}

/// Play one episode: `act -> step -> observe` until the environment ends it
/// or `max_steps` steps have run.
///
/// Hitting `max_steps` marks the final transition as truncated, so the agent
/// closes the episode and still bootstraps from the last state. Any episode
/// the agent had in progress is abandoned first.
pub fn run_episode<L, E, S, H, F, Env>(
    agent: &mut Agent<L, E, S, H, F>,
    env: &mut Env,
    max_steps: usize,
) -> Result<EpisodeSummary>
where
    L: PolicyLearner,
    E: ExplorationStrategy,
    S: ExperienceStore,
    H: HistorySummarizer,
    F: SafetyModule,
    Env: Environment + ?Sized,
{
    agent.reset_episode();
    let mut observation = env.reset();
    let mut summary = EpisodeSummary {
        steps: 0,
        total_reward: 0.0,
        terminated: false,
        truncated: false,
    };
    if max_steps == 0 {
        return Ok(summary);
    }

    loop {
        let action = agent.act(&observation)?;
        let result = env.step(&action)?;
        summary.steps += 1;
        summary.total_reward += result.reward;

        let out_of_steps = summary.steps >= max_steps && !result.done();
        let truncated = result.truncated || out_of_steps;
        agent.observe(&action, result.reward, &result.observation, result.terminated, truncated)?;

        if result.terminated || truncated {
            summary.terminated = result.terminated;
            summary.truncated = truncated;
            break;
        }
        observation = result.observation;
    }

    debug!(
        "run_episode: {} steps, reward {:.3}, terminated {}",
        summary.steps, summary.total_reward, summary.terminated
    );
    Ok(summary)
}
