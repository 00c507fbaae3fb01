//! Lifecycle listeners
//!
//! Observability hooks fired around task processing and worker cycles.
//! Listeners never participate in control flow; metrics and log exporters
//! implement these traits and are attached to the queue service.

use std::time::Duration;

use crate::runner::QueueRunnerError;
use crate::settings::{QueueId, QueueTableLocation};
use crate::shard::QueueShardId;
use crate::task::{TaskExecutionResult, TaskProcessingError, TaskRecord};

/// Task-level lifecycle events for one claimed row.
///
/// Call order per claim: `picked`, `started`, then either `executed`
/// (consumer returned a result) or `crashed` (consumer or resolution
/// failed), and `finished` in every case.
pub trait TaskLifecycleListener: Send + Sync {
    /// A ready row was claimed; `pick_took` is the wall-clock claim latency.
    fn picked(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueTableLocation,
        _record: &TaskRecord,
        _pick_took: Duration,
    ) {
    }

    /// Consumer logic is about to run.
    fn started(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueTableLocation,
        _record: &TaskRecord,
    ) {
    }

    /// Consumer logic returned a result.
    fn executed(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueTableLocation,
        _record: &TaskRecord,
        _result: &TaskExecutionResult,
        _took: Duration,
    ) {
    }

    /// Consumer logic or result resolution failed; the row stays on its
    /// pre-scheduled retry schedule.
    fn crashed(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueTableLocation,
        _record: &TaskRecord,
        _error: &TaskProcessingError,
    ) {
    }

    /// Processing of this claim ended, regardless of outcome.
    fn finished(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueTableLocation,
        _record: &TaskRecord,
    ) {
    }
}

/// Worker-cycle lifecycle events.
///
/// Call order per cycle: `started`, then `executed` or `crashed`, then
/// `finished`.
pub trait ThreadLifecycleListener: Send + Sync {
    /// A worker cycle begins.
    fn started(&self, _queue_id: &QueueId, _shard_id: &QueueShardId) {}

    /// The cycle ran the queue; `task_processed` tells whether a task was
    /// found and `took` is the busy time of the cycle.
    fn executed(
        &self,
        _queue_id: &QueueId,
        _shard_id: &QueueShardId,
        _task_processed: bool,
        _took: Duration,
    ) {
    }

    /// The cycle crashed in the pick path; the worker backs off for the
    /// fatal-crash timeout before the next cycle.
    fn crashed(&self, _queue_id: &QueueId, _shard_id: &QueueShardId, _error: &QueueRunnerError) {}

    /// The cycle ended, regardless of outcome.
    fn finished(&self, _queue_id: &QueueId, _shard_id: &QueueShardId) {}
}

/// Listener that ignores all task-level events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskListener;

impl TaskLifecycleListener for NoopTaskListener {}

/// Listener that ignores all worker-cycle events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopThreadListener;

impl ThreadLifecycleListener for NoopThreadListener {}
