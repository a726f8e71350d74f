use log::info;
use ndarray::Array1;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Agent, AgentPhase, AgentSettings};
use crate::error::{MetisError, Result};
use crate::exploration::ExplorationStrategy;
use crate::history::HistorySummarizer;
use crate::learner::PolicyLearner;
use crate::metrics::MetricsTracker;
use crate::replay_buffer::ExperienceStore;
use crate::safety::SafetyModule;
use crate::types::StateRepr;

/// Everything needed to resume an agent exactly where it stopped.
///
/// Learner parameters (target networks included), exploration counters and
/// RNG state, summarizer state and the agent's own counters are always
/// captured. The experience store is optional since it can dwarf the rest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint<L, E, S, H, F> {
    pub learner: L,
    pub exploration: E,
    pub summarizer: H,
    pub safety: F,
    pub store: Option<S>,
    pub settings: AgentSettings,
    pub phase: AgentPhase,
    pub current_state: Option<StateRepr>,
    pub last_observation: Option<Array1<f32>>,
    pub exploit: bool,
    pub env_steps: usize,
    pub metrics: MetricsTracker,
}

impl<L, E, S, H, F> Agent<L, E, S, H, F>
where
    L: PolicyLearner + Clone,
    E: ExplorationStrategy + Clone,
    S: ExperienceStore + Clone,
    H: HistorySummarizer + Clone,
    F: SafetyModule + Clone,
{
    /// Snapshot the agent, with or without the store contents
    pub fn checkpoint(&self, include_store: bool) -> Checkpoint<L, E, S, H, F> {
        Checkpoint {
            learner: self.learner.clone(),
            exploration: self.exploration.clone(),
            summarizer: self.summarizer.clone(),
            safety: self.safety.clone(),
            store: include_store.then(|| self.store.clone()),
            settings: self.settings.clone(),
            phase: self.phase,
            current_state: self.current_state.clone(),
            last_observation: self.last_observation.clone(),
            exploit: self.exploit,
            env_steps: self.env_steps,
            metrics: self.metrics.clone(),
        }
    }

    /// Rebuild an agent from a snapshot.
    ///
    /// `store` replaces the snapshot's store when given and is required
    /// when the snapshot was taken without one.
    pub fn from_checkpoint(checkpoint: Checkpoint<L, E, S, H, F>, store: Option<S>) -> Result<Self> {
        let store = store.or(checkpoint.store).ok_or_else(|| {
            MetisError::InvalidState("checkpoint holds no experience store and none was supplied".to_string())
        })?;
        checkpoint.settings.validate()?;
        Ok(Self {
            learner: checkpoint.learner,
            exploration: checkpoint.exploration,
            store,
            summarizer: checkpoint.summarizer,
            safety: checkpoint.safety,
            settings: checkpoint.settings,
            phase: checkpoint.phase,
            current_state: checkpoint.current_state,
            last_observation: checkpoint.last_observation,
            exploit: checkpoint.exploit,
            env_steps: checkpoint.env_steps,
            metrics: checkpoint.metrics,
        })
    }

    /// Write a bincode checkpoint to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P, include_store: bool) -> Result<()>
    where
        Checkpoint<L, E, S, H, F>: Serialize,
    {
        let serialized = bincode::serialize(&self.checkpoint(include_store))?;
        std::fs::write(path.as_ref(), serialized)?;
        info!(
            "Saved checkpoint to {} after {} environment steps",
            path.as_ref().display(),
            self.env_steps
        );
        Ok(())
    }

    /// Restore an agent written by [`save`](Self::save)
    pub fn load<P: AsRef<Path>>(path: P, store: Option<S>) -> Result<Self>
    where
        Checkpoint<L, E, S, H, F>: DeserializeOwned,
    {
        let data = std::fs::read(path.as_ref())?;
        let checkpoint: Checkpoint<L, E, S, H, F> = bincode::deserialize(&data)?;
        info!("Loaded checkpoint from {}", path.as_ref().display());
        Self::from_checkpoint(checkpoint, store)
    }
}
