use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use super::{Agent, AgentSettings, DefaultAgent};
use crate::error::Result;
use crate::exploration::ExplorationConfig;
use crate::history::{HistorySummarizer, SummarizerConfig};
use crate::learner::LearnerConfig;
use crate::replay_buffer::ReplayBufferConfig;
use crate::safety::SafetyConfig;
use crate::types::ActionSpace;

/// Complete description of a [DefaultAgent].
///
/// Loaded from and saved to YAML; every section falls back to its default
/// when omitted.
///
/// ```yaml
/// observation_dim: 4
/// action_space:
///   Discrete:
///     n: 2
/// learner:
///   kind: dqn
///   double_dqn: true
/// exploration:
///   kind: epsilon_greedy
///   schedule:
///     linear:
///       start: 1.0
///       end: 0.05
///       steps: 10000
/// replay_buffer:
///   kind: prioritized
///   capacity: 50000
/// settings:
///   batch_size: 64
///   learn_cadence: every_step
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub observation_dim: usize,
    pub action_space: ActionSpace,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub learner: LearnerConfig,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    #[serde(default)]
    pub replay_buffer: ReplayBufferConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub settings: AgentSettings,
}

impl AgentConfig {
    pub fn new(observation_dim: usize, action_space: ActionSpace) -> Self {
        Self {
            observation_dim,
            action_space,
            summarizer: SummarizerConfig::default(),
            learner: LearnerConfig::default(),
            exploration: ExplorationConfig::default(),
            replay_buffer: ReplayBufferConfig::default(),
            safety: SafetyConfig::default(),
            settings: AgentSettings::default(),
        }
    }

    pub fn summarizer(mut self, summarizer: SummarizerConfig) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn learner(mut self, learner: LearnerConfig) -> Self {
        self.learner = learner;
        self
    }

    pub fn exploration(mut self, exploration: ExplorationConfig) -> Self {
        self.exploration = exploration;
        self
    }

    pub fn replay_buffer(mut self, replay_buffer: ReplayBufferConfig) -> Self {
        self.replay_buffer = replay_buffer;
        self
    }

    pub fn safety(mut self, safety: SafetyConfig) -> Self {
        self.safety = safety;
        self
    }

    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Construct every component and assemble the agent.
    ///
    /// The learner is sized by the summarizer's state dimension. A fallback
    /// action in `safety` takes precedence over one in `settings`.
    pub fn build(&self) -> Result<DefaultAgent> {
        self.action_space.validate()?;
        let summarizer = self.summarizer.build(self.observation_dim)?;
        let learner = self.learner.build(summarizer.state_dim(), &self.action_space)?;
        let exploration = self.exploration.build()?;
        let store = self.replay_buffer.build()?;
        let safety = self.safety.build();

        let mut settings = self.settings.clone();
        if let Some(fallback) = &self.safety.fallback {
            settings.fallback_action = Some(fallback.clone());
        }
        Agent::new(learner, exploration, store, summarizer, safety, settings)
    }

    /// Read a YAML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Write the config as YAML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}
