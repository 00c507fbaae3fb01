//! Failure retry settings
//!
//! These settings drive the crash-retry schedule that the pick operation
//! pre-applies to every claimed row, so a worker dying mid-execution never
//! needs extra bookkeeping to make the row claimable again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicValue};
use super::duration_millis;

/// Backoff progression applied on task failure, keyed by attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureRetryType {
    /// `interval * 2^attempt`: 1, 2, 4, 8, 16, 32 intervals.
    Geometric,

    /// `interval * (1 + 2 * attempt)`: 1, 3, 5, 7, 9, 11 intervals.
    Arithmetic,

    /// Constant `interval` regardless of attempt.
    Linear,
}

impl std::fmt::Display for FailureRetryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Geometric => write!(f, "geometric"),
            Self::Arithmetic => write!(f, "arithmetic"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

impl std::str::FromStr for FailureRetryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geometric" => Ok(Self::Geometric),
            "arithmetic" => Ok(Self::Arithmetic),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown retry type `{other}`")),
        }
    }
}

/// Retry schedule applied when a task fails or its worker crashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSettings {
    /// Backoff progression.
    pub retry_type: FailureRetryType,

    /// Base interval the progression multiplies.
    #[serde(with = "duration_millis")]
    pub retry_interval: Duration,
}

impl Default for FailureSettings {
    fn default() -> Self {
        Self {
            retry_type: FailureRetryType::Geometric,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl FailureSettings {
    pub fn new(retry_type: FailureRetryType, retry_interval: Duration) -> Self {
        Self {
            retry_type,
            retry_interval,
        }
    }

    /// Set the backoff progression
    pub fn with_retry_type(mut self, retry_type: FailureRetryType) -> Self {
        self.retry_type = retry_type;
        self
    }

    /// Set the base interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

impl DynamicValue for FailureSettings {
    fn group() -> &'static str {
        "failure"
    }

    fn diff(old: &Self, new: &Self) -> String {
        let mut parts = Vec::new();
        if old.retry_type != new.retry_type {
            diff_field(&mut parts, "retry_type", &old.retry_type, &new.retry_type);
        }
        if old.retry_interval != new.retry_interval {
            diff_field(
                &mut parts,
                "retry_interval",
                &format!("{:?}", old.retry_interval),
                &format!("{:?}", new.retry_interval),
            );
        }
        format!("{}({})", Self::group(), parts.join(","))
    }
}
