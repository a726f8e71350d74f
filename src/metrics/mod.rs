//! Learning and episode diagnostics collected by the agent.

pub mod tracker;

pub use tracker::{MetricsTracker, TrainingMetrics};
