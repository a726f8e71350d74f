use thiserror::Error;

/// Result type for Metis operations
pub type Result<T> = std::result::Result<T, MetisError>;

/// Main error type for the Metis agent core
#[derive(Error, Debug)]
pub enum MetisError {
    /// The experience store holds fewer eligible items than requested
    #[error("Insufficient data: requested {requested} items, {available} eligible")]
    InsufficientData { requested: usize, available: usize },

    /// A learner was handed a batch with nothing in it
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// Operation not supported by this component variant
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No feasible action exists under the given constraints
    #[error("Infeasible action: {0}")]
    InfeasibleAction(String),

    /// An action fell outside the declared action space
    #[error("Action space violation: {0}")]
    ActionSpaceViolation(String),

    /// Invalid dimensions for operations
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Operation called in the wrong agent phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// `act` received a different observation than the last `observe`
    #[error("Observation mismatch: act() must receive the next_observation passed to observe()")]
    ObservationMismatch,

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint or metrics (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file errors
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl From<bincode::Error> for MetisError {
    fn from(err: bincode::Error) -> Self {
        MetisError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MetisError {
    fn from(err: serde_json::Error) -> Self {
        MetisError::Serialization(err.to_string())
    }
}

impl MetisError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        MetisError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>, R: Into<String>>(name: S, reason: R) -> Self {
        MetisError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Errors the agent recovers from locally (skip-and-continue or fallback).
    ///
    /// Everything else is a contract violation and propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MetisError::InsufficientData { .. } | MetisError::InfeasibleAction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = MetisError::InsufficientData { requested: 4, available: 1 };
        assert!(err.is_recoverable());
        assert!(MetisError::InfeasibleAction("empty mask".into()).is_recoverable());
        assert!(!MetisError::EmptyBatch("no items".into()).is_recoverable());
        assert!(!MetisError::ActionSpaceViolation("index 3".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = MetisError::InsufficientData { requested: 2, available: 1 };
        assert_eq!(err.to_string(), "Insufficient data: requested 2 items, 1 eligible");

        let err = MetisError::invalid_parameter("gamma", "must be in [0, 1)");
        assert_eq!(err.to_string(), "Invalid parameter 'gamma': must be in [0, 1)");
    }
}
