//! Reenqueue delay settings
//!
//! Reenqueueing returns a task to pending status with a fresh schedule and
//! is distinct from a failure retry: the attempt counter resets and the
//! reenqueue-attempt counter advances instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicValue};
use super::{duration_millis, duration_millis_vec, SettingsError};

/// Delay strategy used when a consumer reenqueues a task without an
/// explicit delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum ReenqueueSettings {
    /// The consumer must always supply an explicit delay; a bare reenqueue
    /// is a caller error.
    Manual,

    /// Constant configured delay.
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },

    /// Planned delays indexed by reenqueue attempt, clamped to the last
    /// entry once the plan is exhausted.
    Sequential {
        #[serde(with = "duration_millis_vec")]
        plan: Vec<Duration>,
    },

    /// `initial_delay + step * attempt`.
    Arithmetic {
        #[serde(with = "duration_millis")]
        initial_delay: Duration,
        #[serde(with = "duration_millis")]
        step: Duration,
    },

    /// `initial_delay * ratio^attempt`.
    Geometric {
        #[serde(with = "duration_millis")]
        initial_delay: Duration,
        ratio: u32,
    },
}

impl ReenqueueSettings {
    pub fn manual() -> Self {
        Self::Manual
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Planned delays; the plan must contain at least one entry.
    pub fn sequential(plan: Vec<Duration>) -> Result<Self, SettingsError> {
        if plan.is_empty() {
            return Err(SettingsError::EmptySequentialPlan);
        }
        Ok(Self::Sequential { plan })
    }

    pub fn arithmetic(initial_delay: Duration, step: Duration) -> Self {
        Self::Arithmetic {
            initial_delay,
            step,
        }
    }

    /// Geometric progression; the ratio must be at least 1.
    pub fn geometric(initial_delay: Duration, ratio: u32) -> Result<Self, SettingsError> {
        if ratio < 1 {
            return Err(SettingsError::InvalidRatio(ratio));
        }
        Ok(Self::Geometric {
            initial_delay,
            ratio,
        })
    }

    /// Strategy name as used in configuration files.
    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Fixed { .. } => "fixed",
            Self::Sequential { .. } => "sequential",
            Self::Arithmetic { .. } => "arithmetic",
            Self::Geometric { .. } => "geometric",
        }
    }
}

impl std::fmt::Display for ReenqueueSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Fixed { delay } => write!(f, "fixed[{delay:?}]"),
            Self::Sequential { plan } => write!(f, "sequential{plan:?}"),
            Self::Arithmetic {
                initial_delay,
                step,
            } => write!(f, "arithmetic[{initial_delay:?}+{step:?}*k]"),
            Self::Geometric {
                initial_delay,
                ratio,
            } => write!(f, "geometric[{initial_delay:?}*{ratio}^k]"),
        }
    }
}

impl DynamicValue for ReenqueueSettings {
    fn group() -> &'static str {
        "reenqueue"
    }

    fn diff(old: &Self, new: &Self) -> String {
        let mut parts = Vec::new();
        diff_field(&mut parts, "strategy", old, new);
        format!("{}({})", Self::group(), parts.join(","))
    }
}
