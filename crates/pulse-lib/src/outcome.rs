//! Computed-versus-substituted results.
//!
//! Most estimators in this crate never fail: short or degenerate input is
//! replaced by a documented default. [`Estimate`] keeps track of which of the
//! two happened so callers (and tests) can tell them apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an estimator substituted its default value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Not enough samples or intervals to run the computation.
    #[error("insufficient data: needed {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Enough data, but nothing usable survived filtering.
    #[error("degenerate signal")]
    DegenerateSignal,

    /// Intermediate or final value was NaN, infinite or out of its valid range.
    #[error("invalid numeric result")]
    InvalidNumeric,
}

/// Value produced by an estimator, tagged with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimate<T> {
    Computed(T),
    Fallback { value: T, reason: FallbackReason },
}

impl<T> Estimate<T> {
    pub fn fallback(value: T, reason: FallbackReason) -> Self {
        Estimate::Fallback { value, reason }
    }

    pub fn value(&self) -> T
    where
        T: Copy,
    {
        match self {
            Estimate::Computed(v) => *v,
            Estimate::Fallback { value, .. } => *value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Estimate::Computed(v) => v,
            Estimate::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Estimate::Fallback { .. })
    }

    pub fn reason(&self) -> Option<FallbackReason> {
        match self {
            Estimate::Computed(_) => None,
            Estimate::Fallback { reason, .. } => Some(*reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Estimate<U> {
        match self {
            Estimate::Computed(v) => Estimate::Computed(f(v)),
            Estimate::Fallback { value, reason } => Estimate::Fallback {
                value: f(value),
                reason,
            },
        }
    }
}
