//! # Agent
//!
//! The [`Agent`] owns one of each component and drives the interaction loop:
//!
//! ```text
//! act(obs)      -> summarize -> learner scores -> exploration -> safety filter -> Action
//! observe(...)  -> summarize next obs -> Transition -> store.push -> maybe learn
//! learn()       -> store.learn_from_sample(learner.learn_batch) -> metrics
//! ```
//!
//! An agent is either `Idle` (between episodes) or `InEpisode`. The first
//! `act` of an episode feeds the observation to the summarizer; every later
//! `act` reuses the state computed by the preceding `observe`, so each
//! observation is summarized exactly once.
//!
//! ## Example
//!
//! ```rust
//! use metis::agent::AgentConfig;
//! use metis::types::ActionSpace;
//! use ndarray::array;
//!
//! let config = AgentConfig::new(2, ActionSpace::discrete(2));
//! let mut agent = config.build().unwrap();
//!
//! let action = agent.act(&array![0.0, 1.0]).unwrap();
//! agent.observe(&action, 1.0, &array![1.0, 0.0], true, false).unwrap();
//! assert_eq!(agent.metrics().episode_count(), 1);
//! ```

use log::{debug, info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MetisError, Result};
use crate::exploration::{greedy_action, ExplorationStrategy, ExplorationWrapper};
use crate::history::{HistorySummarizer, SummarizerWrapper};
use crate::learner::{LearnStats, LearnerWrapper, PolicyLearner};
use crate::metrics::MetricsTracker;
use crate::replay_buffer::{ExperienceStore, ReplayBufferWrapper, SampleParams};
use crate::safety::{ActionConstraints, SafetyModule, SafetyWrapper};
use crate::types::{Action, ActionSpace, StateRepr, Transition};

pub mod checkpoint;
pub mod config;

pub use checkpoint::Checkpoint;
pub use config::AgentConfig;

/// Agent assembled from the bundled components, as built by [AgentConfig]
pub type DefaultAgent = Agent<LearnerWrapper, ExplorationWrapper, ReplayBufferWrapper, SummarizerWrapper, SafetyWrapper>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    Idle,
    InEpisode,
}

/// When `observe` triggers learning on its own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnCadence {
    EveryStep,
    EveryNSteps(usize),
    /// After the step that ends an episode
    EveryEpisode,
    /// Only when `learn` is called directly
    Manual,
}

impl Default for LearnCadence {
    fn default() -> Self {
        LearnCadence::EveryStep
    }
}

/// Orchestration settings of an [Agent]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub batch_size: usize,
    pub learn_cadence: LearnCadence,
    /// Learning rounds run per cadence trigger
    pub learn_steps_per_trigger: usize,
    /// Passed to every `sample` call
    pub beta: Option<f32>,
    pub sequence_length: Option<usize>,
    /// Executed when the safety filter finds the proposal infeasible;
    /// the action space's default action when unset
    pub fallback_action: Option<Action>,
    /// Length of every metric series
    pub metrics_history: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learn_cadence: LearnCadence::EveryStep,
            learn_steps_per_trigger: 1,
            beta: None,
            sequence_length: None,
            fallback_action: None,
            metrics_history: 1000,
        }
    }
}

impl AgentSettings {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn learn_cadence(mut self, cadence: LearnCadence) -> Self {
        self.learn_cadence = cadence;
        self
    }

    pub fn learn_steps_per_trigger(mut self, steps: usize) -> Self {
        self.learn_steps_per_trigger = steps;
        self
    }

    pub fn sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = Some(length);
        self
    }

    pub fn fallback_action(mut self, action: Action) -> Self {
        self.fallback_action = Some(action);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MetisError::invalid_parameter("batch_size", "must be at least 1"));
        }
        if self.learn_steps_per_trigger == 0 {
            return Err(MetisError::invalid_parameter("learn_steps_per_trigger", "must be at least 1"));
        }
        if self.learn_cadence == LearnCadence::EveryNSteps(0) {
            return Err(MetisError::invalid_parameter("learn_cadence", "every_n_steps needs n >= 1"));
        }
        if self.sequence_length == Some(0) {
            return Err(MetisError::invalid_parameter("sequence_length", "must be at least 1"));
        }
        Ok(())
    }

    fn sample_params(&self) -> SampleParams {
        SampleParams {
            beta: self.beta,
            sequence_length: self.sequence_length,
        }
    }
}

/// An online agent: learner `L`, exploration `E`, store `S`, summarizer `H`
/// and safety filter `F`.
#[derive(Clone, Debug)]
pub struct Agent<L, E, S, H, F = SafetyWrapper> {
    learner: L,
    exploration: E,
    store: S,
    summarizer: H,
    safety: F,
    settings: AgentSettings,
    phase: AgentPhase,
    /// Summary of the most recent observation of the running episode
    current_state: Option<StateRepr>,
    last_observation: Option<Array1<f32>>,
    exploit: bool,
    env_steps: usize,
    metrics: MetricsTracker,
}

impl<L, E, S, H, F> Agent<L, E, S, H, F>
where
    L: PolicyLearner,
    E: ExplorationStrategy,
    S: ExperienceStore,
    H: HistorySummarizer,
    F: SafetyModule,
{
    pub fn new(learner: L, exploration: E, store: S, summarizer: H, safety: F, settings: AgentSettings) -> Result<Self> {
        settings.validate()?;
        learner.action_space().validate()?;
        if let Some(fallback) = &settings.fallback_action {
            learner.action_space().check(fallback)?;
        }
        Ok(Self {
            metrics: MetricsTracker::new(settings.metrics_history),
            learner,
            exploration,
            store,
            summarizer,
            safety,
            settings,
            phase: AgentPhase::Idle,
            current_state: None,
            last_observation: None,
            exploit: false,
            env_steps: 0,
        })
    }

    /// Choose an action for `observation` without constraints
    pub fn act(&mut self, observation: &Array1<f32>) -> Result<Action> {
        self.act_with_constraints(observation, &ActionConstraints::none())
    }

    /// Choose an action for `observation` subject to `constraints`.
    ///
    /// Starts an episode when idle. Inside an episode `observation` must be
    /// the `next_observation` last passed to [`observe`](Self::observe).
    pub fn act_with_constraints(&mut self, observation: &Array1<f32>, constraints: &ActionConstraints) -> Result<Action> {
        let state = self.state_for(observation)?;
        let scores = self.learner.act(&state)?;
        let space = self.learner.action_space();

        let proposed = if self.exploit {
            greedy_action(&scores, space)?
        } else {
            self.exploration.select_action(&scores, space)?
        };

        let action = match self.safety.filter_action(&proposed, &state, constraints) {
            Ok(action) => action,
            Err(MetisError::InfeasibleAction(reason)) => {
                let fallback = constraints.feasible_fallback(self.settings.fallback_action.as_ref(), space)?;
                warn!("Safety filter rejected {}: {}; executing fallback {}", proposed, reason, fallback);
                self.metrics.record_custom("safety_fallbacks", 1.0);
                fallback
            }
            Err(err) => return Err(err),
        };

        space.check(&action)?;
        Ok(action)
    }

    fn state_for(&mut self, observation: &Array1<f32>) -> Result<StateRepr> {
        match self.phase {
            AgentPhase::Idle => {
                let state = self.summarizer.summarize(observation)?;
                self.current_state = Some(state.clone());
                self.last_observation = Some(observation.clone());
                self.phase = AgentPhase::InEpisode;
                debug!("Episode {} started", self.metrics.episode_count() + 1);
                Ok(state)
            }
            AgentPhase::InEpisode => match (&self.last_observation, &self.current_state) {
                (Some(last), Some(state)) if last == observation => Ok(state.clone()),
                _ => Err(MetisError::ObservationMismatch),
            },
        }
    }

    /// Record the outcome of executing `action`.
    ///
    /// Pushes the transition, runs cadence-triggered learning and, when the
    /// step ends the episode, resets per-episode state and returns to `Idle`.
    pub fn observe(
        &mut self,
        action: &Action,
        reward: f32,
        next_observation: &Array1<f32>,
        terminated: bool,
        truncated: bool,
    ) -> Result<()> {
        let state_before = match (self.phase, &self.current_state) {
            (AgentPhase::InEpisode, Some(state)) => state.clone(),
            _ => {
                return Err(MetisError::InvalidState(
                    "observe called outside an episode; call act first".to_string(),
                ))
            }
        };
        self.learner.action_space().check(action)?;

        let state_after = self.summarizer.summarize(next_observation)?;
        self.store.push(Transition::new(
            state_before,
            action.clone(),
            reward,
            state_after.clone(),
            terminated,
            truncated,
        ));
        self.metrics.step(reward);
        self.env_steps += 1;
        self.current_state = Some(state_after);
        self.last_observation = Some(next_observation.clone());

        let done = terminated || truncated;
        if done {
            info!(
                "Episode {} finished after {} steps with reward {:.3}{}",
                self.metrics.episode_count() + 1,
                self.metrics.current_episode_length(),
                self.metrics.current_episode_reward(),
                if truncated && !terminated { " (truncated)" } else { "" }
            );
            self.metrics.end_episode();
            self.end_episode();
        }

        let triggered = match self.settings.learn_cadence {
            LearnCadence::EveryStep => true,
            LearnCadence::EveryNSteps(n) => self.env_steps % n == 0,
            LearnCadence::EveryEpisode => done,
            LearnCadence::Manual => false,
        };
        if triggered {
            self.learn_on_trigger()?;
        }
        Ok(())
    }

    fn learn_on_trigger(&mut self) -> Result<()> {
        for _ in 0..self.settings.learn_steps_per_trigger {
            match self.learn() {
                Ok(_) => {}
                Err(err @ MetisError::InsufficientData { .. }) => {
                    debug!("Skipping learning: {}", err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Run one learning step on a freshly sampled batch.
    ///
    /// Returns `InsufficientData` while the store holds fewer eligible items
    /// than the batch size.
    pub fn learn(&mut self) -> Result<LearnStats> {
        let learner = &mut self.learner;
        let (batch, stats) = self.store.learn_from_sample(
            self.settings.batch_size,
            &self.settings.sample_params(),
            |batch| {
                let stats = learner.learn_batch(batch)?;
                if stats.td_errors.len() == batch.indices().len() {
                    let priorities = stats.td_errors.clone();
                    Ok((stats, Some(priorities)))
                } else {
                    warn!(
                        "Learner reported {} td-errors for a batch of {}; priorities left unchanged",
                        stats.td_errors.len(),
                        batch.len()
                    );
                    Ok((stats, None))
                }
            },
        )?;

        self.metrics.record_learn(&stats);
        if let Some(rate) = self.exploration.exploration_rate() {
            self.metrics.record_exploration_rate(rate);
        }
        debug!(
            "Learn step {}: loss {:.5}, batch {}",
            self.learner.learn_steps(),
            stats.loss,
            batch.len()
        );
        Ok(stats)
    }

    /// Abandon the running episode without recording it.
    ///
    /// The store is told the episode ended, so sequences never run from the
    /// abandoned steps into the next episode.
    pub fn reset_episode(&mut self) {
        if self.phase == AgentPhase::InEpisode {
            debug!("Episode abandoned after {} steps", self.metrics.current_episode_length());
            self.store.end_episode();
        }
        self.metrics.discard_episode();
        self.end_episode();
    }

    fn end_episode(&mut self) {
        self.summarizer.reset();
        self.exploration.reset();
        self.current_state = None;
        self.last_observation = None;
        self.phase = AgentPhase::Idle;
    }

    /// Bypass exploration and act greedily on the learner's scores
    pub fn set_exploit(&mut self, exploit: bool) {
        self.exploit = exploit;
    }

    pub fn is_exploiting(&self) -> bool {
        self.exploit
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Summary of the latest observation while an episode is running
    pub fn current_state(&self) -> Option<&StateRepr> {
        self.current_state.as_ref()
    }

    pub fn action_space(&self) -> &ActionSpace {
        self.learner.action_space()
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Environment steps observed over the agent's lifetime
    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn exploration(&self) -> &E {
        &self.exploration
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn summarizer(&self) -> &H {
        &self.summarizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploration::{ActionScores, EpsilonGreedy, Greedy};
    use crate::history::IdentitySummarizer;
    use crate::replay_buffer::{Batch, FifoReplayBuffer};
    use crate::safety::{ConstraintFilter, FilterMode, PassThrough};
    use ndarray::array;

    /// Scores a fixed vector and counts learning calls
    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct FixedLearner {
        scores: Array1<f32>,
        space: ActionSpace,
        learn_steps: usize,
    }

    impl FixedLearner {
        fn new(scores: Array1<f32>) -> Self {
            let space = ActionSpace::discrete(scores.len());
            Self { scores, space, learn_steps: 0 }
        }
    }

    impl PolicyLearner for FixedLearner {
        fn act(&self, _state: &StateRepr) -> Result<ActionScores> {
            Ok(ActionScores::new(self.scores.clone()))
        }

        fn learn_batch(&mut self, batch: &Batch) -> Result<LearnStats> {
            self.learn_steps += 1;
            Ok(LearnStats {
                loss: batch.len() as f32,
                td_errors: vec![1.0; batch.len()],
                ..LearnStats::default()
            })
        }

        fn action_space(&self) -> &ActionSpace {
            &self.space
        }

        fn learn_steps(&self) -> usize {
            self.learn_steps
        }
    }

    fn agent(
        settings: AgentSettings,
    ) -> Agent<FixedLearner, Greedy, FifoReplayBuffer, IdentitySummarizer, PassThrough> {
        Agent::new(
            FixedLearner::new(array![1.0, 0.0]),
            Greedy::new(),
            FifoReplayBuffer::new(10, 0),
            IdentitySummarizer::new(1),
            PassThrough,
            settings,
        )
        .unwrap()
    }

    #[test]
    fn test_act_then_observe_cycle() {
        let mut agent = agent(AgentSettings::default().batch_size(2));
        assert_eq!(agent.phase(), AgentPhase::Idle);
        let action = agent.act(&array![0.0]).unwrap();
        assert_eq!(action, Action::Discrete(0));
        assert_eq!(agent.phase(), AgentPhase::InEpisode);

        agent.observe(&action, 1.0, &array![1.0], false, false).unwrap();
        assert_eq!(agent.store().len(), 1);
        assert_eq!(agent.current_state(), Some(&array![1.0]));

        agent.act(&array![1.0]).unwrap();
        agent.observe(&action, 1.0, &array![2.0], true, false).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Idle);
        assert_eq!(agent.metrics().episode_count(), 1);
        assert_eq!(agent.learner().learn_steps(), 1);
    }

    #[test]
    fn test_act_rejects_unexpected_observation() {
        let mut agent = agent(AgentSettings::default());
        let action = agent.act(&array![0.0]).unwrap();
        agent.observe(&action, 0.0, &array![1.0], false, false).unwrap();
        assert!(matches!(agent.act(&array![5.0]), Err(MetisError::ObservationMismatch)));
        assert!(agent.act(&array![1.0]).is_ok());
    }

    #[test]
    fn test_observe_requires_episode() {
        let mut agent = agent(AgentSettings::default());
        let result = agent.observe(&Action::Discrete(0), 0.0, &array![0.0], false, false);
        assert!(matches!(result, Err(MetisError::InvalidState(_))));
    }

    #[test]
    fn test_observe_rejects_foreign_action() {
        let mut agent = agent(AgentSettings::default());
        agent.act(&array![0.0]).unwrap();
        let result = agent.observe(&Action::Discrete(7), 0.0, &array![0.0], false, false);
        assert!(matches!(result, Err(MetisError::ActionSpaceViolation(_))));
        assert_eq!(agent.store().len(), 0);
    }

    #[test]
    fn test_direct_learn_reports_insufficient_data() {
        let mut agent = agent(AgentSettings::default().batch_size(4).learn_cadence(LearnCadence::Manual));
        let action = agent.act(&array![0.0]).unwrap();
        agent.observe(&action, 0.0, &array![1.0], false, false).unwrap();
        match agent.learn() {
            Err(MetisError::InsufficientData { requested, available }) => {
                assert_eq!((requested, available), (4, 1));
            }
            other => panic!("expected InsufficientData, got {:?}", other.map(|s| s.loss)),
        }
    }

    #[test]
    fn test_every_n_steps_cadence() {
        let settings = AgentSettings::default()
            .batch_size(1)
            .learn_cadence(LearnCadence::EveryNSteps(3))
            .learn_steps_per_trigger(2);
        let mut agent = agent(settings);
        let mut observation = array![0.0];
        for i in 0..6 {
            let action = agent.act(&observation).unwrap();
            let next = array![i as f32 + 1.0];
            agent.observe(&action, 0.0, &next, false, false).unwrap();
            observation = next;
        }
        assert_eq!(agent.learner().learn_steps(), 4);
        assert_eq!(agent.metrics().learn_steps(), 4);
    }

    #[test]
    fn test_reset_episode_discards_partial_episode() {
        let mut agent = agent(AgentSettings::default().learn_cadence(LearnCadence::Manual));
        let action = agent.act(&array![0.0]).unwrap();
        agent.observe(&action, 3.0, &array![1.0], false, false).unwrap();
        agent.reset_episode();
        assert_eq!(agent.phase(), AgentPhase::Idle);
        assert_eq!(agent.metrics().episode_count(), 0);
        // a fresh episode may start from any observation
        assert!(agent.act(&array![42.0]).is_ok());
    }

    #[test]
    fn test_exploit_mode_skips_exploration() {
        let mut agent = Agent::new(
            FixedLearner::new(array![0.0, 2.0, 1.0]),
            EpsilonGreedy::constant(1.0, 9).unwrap(),
            FifoReplayBuffer::new(10, 0),
            IdentitySummarizer::new(1),
            PassThrough,
            AgentSettings::default().learn_cadence(LearnCadence::Manual),
        )
        .unwrap();
        agent.set_exploit(true);
        for _ in 0..20 {
            assert_eq!(agent.act(&array![0.0]).unwrap(), Action::Discrete(1));
        }
        assert_eq!(agent.exploration().steps(), 0);
    }

    #[test]
    fn test_infeasible_action_uses_fallback() {
        let mut agent = Agent::new(
            FixedLearner::new(array![0.0, 2.0, 1.0]),
            Greedy::new(),
            FifoReplayBuffer::new(10, 0),
            IdentitySummarizer::new(1),
            ConstraintFilter::new(FilterMode::Reject),
            AgentSettings::default().fallback_action(Action::Discrete(2)),
        )
        .unwrap();
        let constraints = ActionConstraints::with_mask(vec![true, false, true]);
        let action = agent.act_with_constraints(&array![0.0], &constraints).unwrap();
        assert_eq!(action, Action::Discrete(2));
        assert_eq!(agent.metrics().avg_custom("safety_fallbacks", 10), Some(1.0));
    }

    #[test]
    fn test_settings_validation() {
        assert!(AgentSettings::default().batch_size(0).validate().is_err());
        assert!(AgentSettings::default()
            .learn_cadence(LearnCadence::EveryNSteps(0))
            .validate()
            .is_err());
        assert!(AgentSettings::default().validate().is_ok());
    }
}
