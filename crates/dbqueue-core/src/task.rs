//! Task data carried between the backend and consumer logic

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::backoff::ReenqueueDelayError;
use crate::payload::PayloadError;
use crate::persistence::DaoError;

/// Boxed consumer-side error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raw claimed row as returned by the pick operation.
///
/// `attempt` resets on reenqueue, `reenqueue_attempt` advances on reenqueue,
/// `total_attempt` never resets. All three reflect the state after the claim
/// incremented the attempt counters.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub payload: String,
    pub attempt: u32,
    pub reenqueue_attempt: u32,
    pub total_attempt: u64,
    pub created_at: DateTime<Utc>,
    pub next_process_at: DateTime<Utc>,
    /// Values of caller-configured extra columns.
    pub extra: BTreeMap<String, String>,
}

/// Typed task view handed to consumer logic.
#[derive(Debug, Clone)]
pub struct Task<T> {
    pub payload: T,
    pub attempt: u32,
    pub reenqueue_attempt: u32,
    pub total_attempt: u64,
    pub created_at: DateTime<Utc>,
    pub next_process_at: DateTime<Utc>,
    pub extra: BTreeMap<String, String>,
}

impl<T> Task<T> {
    /// Build the typed view from a claimed record and its decoded payload.
    pub fn from_record(record: &TaskRecord, payload: T) -> Self {
        Self {
            payload,
            attempt: record.attempt,
            reenqueue_attempt: record.reenqueue_attempt,
            total_attempt: record.total_attempt,
            created_at: record.created_at,
            next_process_at: record.next_process_at,
            extra: record.extra.clone(),
        }
    }
}

/// Outcome of consumer logic for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExecutionResult {
    /// Work is done, delete the row.
    Finish,

    /// Return the task to pending with a fresh schedule; without an explicit
    /// delay the queue's reenqueue settings compute one.
    Reenqueue { delay: Option<Duration> },

    /// Processing failed. With an explicit delay the row is rescheduled;
    /// without one nothing is written, the claim already pre-scheduled the
    /// crash-retry time.
    Fail { delay: Option<Duration> },
}

impl TaskExecutionResult {
    pub fn finish() -> Self {
        Self::Finish
    }

    pub fn reenqueue() -> Self {
        Self::Reenqueue { delay: None }
    }

    pub fn reenqueue_after(delay: Duration) -> Self {
        Self::Reenqueue { delay: Some(delay) }
    }

    pub fn fail() -> Self {
        Self::Fail { delay: None }
    }

    pub fn fail_after(delay: Duration) -> Self {
        Self::Fail { delay: Some(delay) }
    }
}

/// Raw enqueue request passed to the storage contract.
#[derive(Debug, Clone, Default)]
pub struct EnqueueParams {
    pub payload: String,
    /// Initial scheduling delay; zero makes the task immediately claimable.
    pub delay: Duration,
    /// Values for caller-configured extra columns.
    pub extra: BTreeMap<String, String>,
}

impl EnqueueParams {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Set the initial scheduling delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set one extra column value
    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(column.into(), value.into());
        self
    }
}

/// Failure observed while processing one claimed task.
///
/// Passed to the task-level `crashed` listener; the claimed row stays on its
/// pre-scheduled crash-retry schedule, so processing failures are retried
/// without further bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum TaskProcessingError {
    /// Payload could not be decoded into the consumer's type.
    #[error("payload decode failed: {0}")]
    Payload(#[from] PayloadError),

    /// Consumer logic returned an error.
    #[error("consumer execution failed: {0}")]
    Execution(#[source] BoxError),

    /// The backend rejected the result resolution.
    #[error("result resolution failed: {0}")]
    Resolution(#[from] DaoError),

    /// The result required a reenqueue delay that could not be computed.
    #[error("reenqueue delay unavailable: {0}")]
    ReenqueueDelay(#[from] ReenqueueDelayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_constructors() {
        assert_eq!(TaskExecutionResult::finish(), TaskExecutionResult::Finish);
        assert_eq!(
            TaskExecutionResult::reenqueue_after(Duration::from_secs(9)),
            TaskExecutionResult::Reenqueue {
                delay: Some(Duration::from_secs(9))
            }
        );
        assert_eq!(TaskExecutionResult::fail(), TaskExecutionResult::Fail { delay: None });
    }

    #[test]
    fn typed_task_carries_record_counters() {
        let record = TaskRecord {
            id: 7,
            payload: "42".to_string(),
            attempt: 3,
            reenqueue_attempt: 1,
            total_attempt: 9,
            created_at: Utc::now(),
            next_process_at: Utc::now(),
            extra: BTreeMap::from([("trace".to_string(), "abc".to_string())]),
        };
        let task = Task::from_record(&record, 42u32);
        assert_eq!(task.payload, 42);
        assert_eq!(task.attempt, 3);
        assert_eq!(task.reenqueue_attempt, 1);
        assert_eq!(task.total_attempt, 9);
        assert_eq!(task.extra["trace"], "abc");
    }
}
