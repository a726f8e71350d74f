//! # Safety Filters
//!
//! The last stage of action selection. A [`SafetyModule`] sees the action the
//! exploration strategy picked together with per-step [`ActionConstraints`]
//! and either lets it through, repairs it, or refuses with
//! [`MetisError::InfeasibleAction`]. The agent answers a refusal by logging a
//! warning and executing [`ActionConstraints::feasible_fallback`]: its
//! configured fallback when the constraints allow it, otherwise the nearest
//! allowed action. When nothing is allowed the refusal reaches the caller.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MetisError, Result};
use crate::types::{Action, ActionSpace, StateRepr};

/// Per-step restrictions on which actions may be executed
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConstraints {
    /// `mask[i]` allows discrete action `i`; indices past the end are disallowed
    pub mask: Option<Vec<bool>>,
    /// Per-dimension lower bounds for continuous actions
    pub low: Option<Array1<f32>>,
    /// Per-dimension upper bounds for continuous actions
    pub high: Option<Array1<f32>>,
}

impl ActionConstraints {
    /// No restrictions
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_mask(mask: Vec<bool>) -> Self {
        Self {
            mask: Some(mask),
            ..Self::default()
        }
    }

    pub fn with_bounds(low: Array1<f32>, high: Array1<f32>) -> Self {
        Self {
            mask: None,
            low: Some(low),
            high: Some(high),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.mask.is_none() && self.low.is_none() && self.high.is_none()
    }

    pub fn allows(&self, action: &Action) -> bool {
        match action {
            Action::Discrete(index) => self
                .mask
                .as_ref()
                .map_or(true, |mask| mask.get(*index).copied().unwrap_or(false)),
            Action::Continuous(values) => {
                let above = self
                    .low
                    .as_ref()
                    .map_or(true, |low| values.iter().zip(low.iter()).all(|(v, l)| v >= l));
                let below = self
                    .high
                    .as_ref()
                    .map_or(true, |high| values.iter().zip(high.iter()).all(|(v, h)| v <= h));
                above && below
            }
        }
    }

    /// Lowest allowed discrete index under the mask
    pub fn first_allowed(&self) -> Option<usize> {
        match &self.mask {
            Some(mask) => mask.iter().position(|&allowed| allowed),
            None => Some(0),
        }
    }

    /// Action to execute after a filter refused the proposal.
    ///
    /// `preferred` wins when it lies in `space` and the constraints allow it.
    /// Otherwise discrete spaces take the lowest allowed index and continuous
    /// spaces clamp `preferred` (or the box center) into the bounds.
    pub fn feasible_fallback(&self, preferred: Option<&Action>, space: &ActionSpace) -> Result<Action> {
        if let Some(action) = preferred {
            if space.contains(action) && self.allows(action) {
                return Ok(action.clone());
            }
        }
        let candidate = match space {
            ActionSpace::Discrete { n } => (0..*n).map(Action::Discrete).find(|action| self.allows(action)),
            ActionSpace::Continuous { .. } => {
                let start = match preferred.and_then(Action::to_continuous) {
                    Some(values) if values.len() == space.dim() => values.clone(),
                    _ => match space.default_action() {
                        Action::Continuous(center) => center,
                        Action::Discrete(_) => Array1::zeros(space.dim()),
                    },
                };
                self.check_bounds(&start)?;
                Some(Action::Continuous(self.clamp_into(&start)))
                    .filter(|action| space.contains(action) && self.allows(action))
            }
        };
        candidate.ok_or_else(|| {
            MetisError::InfeasibleAction(format!("no action of {:?} satisfies the constraints", space))
        })
    }

    /// Clamp `values` into whichever bounds are set
    fn clamp_into(&self, values: &Array1<f32>) -> Array1<f32> {
        let mut clamped = values.clone();
        if let Some(low) = &self.low {
            clamped.zip_mut_with(low, |v, &l| *v = v.max(l));
        }
        if let Some(high) = &self.high {
            clamped.zip_mut_with(high, |v, &h| *v = v.min(h));
        }
        clamped
    }

    fn check_bounds(&self, values: &Array1<f32>) -> Result<()> {
        for (name, bound) in [("low", &self.low), ("high", &self.high)] {
            if let Some(bound) = bound {
                if bound.len() != values.len() {
                    return Err(MetisError::dimension_mismatch(
                        format!("{} bound of length {}", name, values.len()),
                        format!("{} bound of length {}", name, bound.len()),
                    ));
                }
            }
        }
        if let (Some(low), Some(high)) = (&self.low, &self.high) {
            if low.iter().zip(high.iter()).any(|(l, h)| l > h) {
                return Err(MetisError::InfeasibleAction(
                    "constraint box is empty: some lower bound exceeds its upper bound".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Checks or repairs a proposed action before it is executed
pub trait SafetyModule {
    /// Return the action to execute in place of `proposed`.
    ///
    /// `InfeasibleAction` means no acceptable action could be produced.
    fn filter_action(&mut self, proposed: &Action, state: &StateRepr, constraints: &ActionConstraints) -> Result<Action>;
}

/// Accepts every action unchanged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassThrough;

impl SafetyModule for PassThrough {
    fn filter_action(&mut self, proposed: &Action, _state: &StateRepr, _constraints: &ActionConstraints) -> Result<Action> {
        Ok(proposed.clone())
    }
}

/// What a [ConstraintFilter] does with a violating action
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Repair: masked discrete actions become the lowest allowed index,
    /// continuous actions are clamped into the bounds
    #[default]
    Clamp,
    /// Refuse any violating action
    Reject,
}

/// Enforces masks and box bounds from [ActionConstraints]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintFilter {
    mode: FilterMode,
}

impl ConstraintFilter {
    pub fn new(mode: FilterMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }
}

impl SafetyModule for ConstraintFilter {
    fn filter_action(&mut self, proposed: &Action, _state: &StateRepr, constraints: &ActionConstraints) -> Result<Action> {
        match proposed {
            Action::Discrete(index) => {
                let first_allowed = constraints
                    .first_allowed()
                    .ok_or_else(|| MetisError::InfeasibleAction("action mask allows no action".to_string()))?;
                if constraints.allows(proposed) {
                    return Ok(proposed.clone());
                }
                match self.mode {
                    FilterMode::Clamp => Ok(Action::Discrete(first_allowed)),
                    FilterMode::Reject => Err(MetisError::InfeasibleAction(format!(
                        "discrete action {} is masked out",
                        index
                    ))),
                }
            }
            Action::Continuous(values) => {
                constraints.check_bounds(values)?;
                if constraints.allows(proposed) {
                    return Ok(proposed.clone());
                }
                match self.mode {
                    FilterMode::Clamp => Ok(Action::Continuous(constraints.clamp_into(values))),
                    FilterMode::Reject => Err(MetisError::InfeasibleAction(format!(
                        "{} is outside the constraint bounds",
                        proposed
                    ))),
                }
            }
        }
    }
}

/// Filter selection, tagged by `kind` in config files
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyFilterConfig {
    #[default]
    PassThrough,
    ConstraintFilter {
        #[serde(default)]
        mode: FilterMode,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub filter: SafetyFilterConfig,
    /// Executed when the filter reports `InfeasibleAction`; the action
    /// space's default action when unset
    pub fallback: Option<Action>,
}

impl SafetyConfig {
    pub fn filter(mut self, filter: SafetyFilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn fallback(mut self, fallback: Action) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn build(&self) -> SafetyWrapper {
        match self.filter {
            SafetyFilterConfig::PassThrough => SafetyWrapper::PassThrough(PassThrough),
            SafetyFilterConfig::ConstraintFilter { mode } => {
                SafetyWrapper::ConstraintFilter(ConstraintFilter::new(mode))
            }
        }
    }
}

/// Any of the bundled filters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SafetyWrapper {
    PassThrough(PassThrough),
    ConstraintFilter(ConstraintFilter),
}

impl Default for SafetyWrapper {
    fn default() -> Self {
        SafetyWrapper::PassThrough(PassThrough)
    }
}

impl SafetyModule for SafetyWrapper {
    fn filter_action(&mut self, proposed: &Action, state: &StateRepr, constraints: &ActionConstraints) -> Result<Action> {
        match self {
            SafetyWrapper::PassThrough(filter) => filter.filter_action(proposed, state, constraints),
            SafetyWrapper::ConstraintFilter(filter) => filter.filter_action(proposed, state, constraints),
        }
    }
}
