use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::error::Result;
use crate::learner::LearnStats;

/// Stores training metrics over time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Loss reported by each learning step
    pub losses: VecDeque<f32>,

    /// Mean value estimate reported by each learning step
    pub value_estimates: VecDeque<f32>,

    /// Rewards per episode
    pub episode_rewards: VecDeque<f32>,

    /// Episode lengths
    pub episode_lengths: VecDeque<usize>,

    /// Exploration rate (epsilon, noise scale) sampled at each learning step
    pub exploration_rates: VecDeque<f32>,

    /// Custom metrics, including the learners' extra diagnostics
    pub custom_metrics: BTreeMap<String, VecDeque<f32>>,
}

fn push_bounded<T>(series: &mut VecDeque<T>, value: T, history_size: usize) {
    if series.len() >= history_size {
        series.pop_front();
    }
    series.push_back(value);
}

fn recent_mean(series: &VecDeque<f32>, window: usize) -> Option<f32> {
    if series.is_empty() || window == 0 {
        return None;
    }
    let n = window.min(series.len());
    let sum: f32 = series.iter().rev().take(n).sum();
    Some(sum / n as f32)
}

/// Tracks metrics during training.
///
/// Every series keeps at most `history_size` recent values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsTracker {
    metrics: TrainingMetrics,
    history_size: usize,

    current_episode_reward: f32,
    current_episode_length: usize,
    episode_count: usize,

    total_steps: usize,
    learn_steps: usize,
}

impl MetricsTracker {
    pub fn new(history_size: usize) -> Self {
        MetricsTracker {
            metrics: TrainingMetrics::default(),
            history_size: history_size.max(1),
            current_episode_reward: 0.0,
            current_episode_length: 0,
            episode_count: 0,
            total_steps: 0,
            learn_steps: 0,
        }
    }

    pub fn record_loss(&mut self, loss: f32) {
        push_bounded(&mut self.metrics.losses, loss, self.history_size);
    }

    pub fn record_value_estimate(&mut self, value: f32) {
        push_bounded(&mut self.metrics.value_estimates, value, self.history_size);
    }

    pub fn record_exploration_rate(&mut self, rate: f32) {
        push_bounded(&mut self.metrics.exploration_rates, rate, self.history_size);
    }

    /// Record a custom metric
    pub fn record_custom(&mut self, name: &str, value: f32) {
        let series = self.metrics.custom_metrics.entry(name.to_string()).or_default();
        push_bounded(series, value, self.history_size);
    }

    /// Record everything a learner reported for one learning step
    pub fn record_learn(&mut self, stats: &LearnStats) {
        self.record_loss(stats.loss);
        if let Some(value) = stats.value_estimate {
            self.record_value_estimate(value);
        }
        for (name, value) in &stats.extra {
            self.record_custom(name, *value);
        }
        self.learn_steps += 1;
    }

    /// Record a step within an episode
    pub fn step(&mut self, reward: f32) {
        self.current_episode_reward += reward;
        self.current_episode_length += 1;
        self.total_steps += 1;
    }

    /// Close the current episode and start counting a new one
    pub fn end_episode(&mut self) {
        push_bounded(&mut self.metrics.episode_rewards, self.current_episode_reward, self.history_size);
        push_bounded(&mut self.metrics.episode_lengths, self.current_episode_length, self.history_size);
        self.episode_count += 1;
        self.current_episode_reward = 0.0;
        self.current_episode_length = 0;
    }

    /// Forget the partial episode without recording it
    pub fn discard_episode(&mut self) {
        self.current_episode_reward = 0.0;
        self.current_episode_length = 0;
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn episode_count(&self) -> usize {
        self.episode_count
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Number of learning steps recorded
    pub fn learn_steps(&self) -> usize {
        self.learn_steps
    }

    pub fn current_episode_reward(&self) -> f32 {
        self.current_episode_reward
    }

    pub fn current_episode_length(&self) -> usize {
        self.current_episode_length
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.metrics.losses.back().copied()
    }

    /// Get recent average loss
    pub fn avg_loss(&self, window: usize) -> Option<f32> {
        recent_mean(&self.metrics.losses, window)
    }

    /// Get recent average episode reward
    pub fn avg_episode_reward(&self, window: usize) -> Option<f32> {
        recent_mean(&self.metrics.episode_rewards, window)
    }

    pub fn avg_custom(&self, name: &str, window: usize) -> Option<f32> {
        self.metrics
            .custom_metrics
            .get(name)
            .and_then(|series| recent_mean(series, window))
    }

    /// Clear all metrics
    pub fn clear(&mut self) {
        *self = Self::new(self.history_size);
    }

    /// Save metrics as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.metrics)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Replace the stored series with those saved at `path`
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = std::fs::read_to_string(path)?;
        self.metrics = serde_json::from_str(&data)?;
        Ok(())
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}
