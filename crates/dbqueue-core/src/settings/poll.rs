//! Polling timeout settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicValue};
use super::duration_millis;

/// Wait durations for the worker loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Idle wait after a cycle that processed a task.
    #[serde(with = "duration_millis")]
    pub between_task_timeout: Duration,

    /// Idle wait after a cycle that found no ready task.
    #[serde(with = "duration_millis")]
    pub no_task_timeout: Duration,

    /// Wait after an uncaught crash in the pick path, e.g. a database
    /// outage. Deliberately not interruptible by wakeup so crashed workers
    /// cannot busy-loop the backend.
    #[serde(with = "duration_millis")]
    pub fatal_crash_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            between_task_timeout: Duration::from_millis(100),
            no_task_timeout: Duration::from_secs(1),
            fatal_crash_timeout: Duration::from_secs(2),
        }
    }
}

impl PollSettings {
    pub fn new(
        between_task_timeout: Duration,
        no_task_timeout: Duration,
        fatal_crash_timeout: Duration,
    ) -> Self {
        Self {
            between_task_timeout,
            no_task_timeout,
            fatal_crash_timeout,
        }
    }

    /// Set the wait used after a processed task
    pub fn with_between_task_timeout(mut self, timeout: Duration) -> Self {
        self.between_task_timeout = timeout;
        self
    }

    /// Set the wait used after an empty pick
    pub fn with_no_task_timeout(mut self, timeout: Duration) -> Self {
        self.no_task_timeout = timeout;
        self
    }

    /// Set the wait used after a crashed cycle
    pub fn with_fatal_crash_timeout(mut self, timeout: Duration) -> Self {
        self.fatal_crash_timeout = timeout;
        self
    }
}

impl DynamicValue for PollSettings {
    fn group() -> &'static str {
        "poll"
    }

    fn diff(old: &Self, new: &Self) -> String {
        let mut parts = Vec::new();
        if old.between_task_timeout != new.between_task_timeout {
            diff_field(
                &mut parts,
                "between_task_timeout",
                &format!("{:?}", old.between_task_timeout),
                &format!("{:?}", new.between_task_timeout),
            );
        }
        if old.no_task_timeout != new.no_task_timeout {
            diff_field(
                &mut parts,
                "no_task_timeout",
                &format!("{:?}", old.no_task_timeout),
                &format!("{:?}", new.no_task_timeout),
            );
        }
        if old.fatal_crash_timeout != new.fatal_crash_timeout {
            diff_field(
                &mut parts,
                "fatal_crash_timeout",
                &format!("{:?}", old.fatal_crash_timeout),
                &format!("{:?}", new.fatal_crash_timeout),
            );
        }
        format!("{}({})", Self::group(), parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let settings = PollSettings::default();
        assert_eq!(settings.between_task_timeout, Duration::from_millis(100));
        assert_eq!(settings.no_task_timeout, Duration::from_secs(1));
        assert_eq!(settings.fatal_crash_timeout, Duration::from_secs(2));
    }

    #[test]
    fn diff_reports_timeouts() {
        let old = PollSettings::default();
        let new = old.clone().with_no_task_timeout(Duration::from_secs(5));
        assert_eq!(PollSettings::diff(&old, &new), "poll(no_task_timeout=5s<-1s)");
    }
}
