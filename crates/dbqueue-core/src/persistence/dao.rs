//! Storage contract
//!
//! The engine talks to the relational backend exclusively through these
//! traits. One implementation exists per database dialect; the pick
//! operation is the only cross-process synchronization point and must be
//! atomic with respect to concurrent callers.

use std::time::Duration;

use async_trait::async_trait;

use crate::settings::{FailureSettings, QueueTableLocation};
use crate::task::{EnqueueParams, TaskRecord};

/// Backend operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DaoError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Row data could not be mapped into a task record
    #[error("row mapping error: {0}")]
    RowMapping(String),
}

/// Data access contract for one backend.
///
/// Operations called directly on the DAO run in their own implicit
/// transaction; [`begin`](TaskDao::begin) opens an explicit one for the
/// wrap-in-transaction processing mode.
///
/// `pick_task` MUST atomically: select one row of the queue whose
/// `next_process_at` is due, lock it against concurrent claim by any other
/// worker in any process (skip-locked semantics or equivalent), advance its
/// `next_process_at` by the failure backoff computed from the pre-increment
/// attempt count, and increment the attempt counters. A worker crashing
/// mid-execution therefore leaves the row claimable again at the correct
/// backoff time without extra bookkeeping.
#[async_trait]
pub trait TaskDao: Send + Sync + 'static {
    /// Insert a new task, returning its id.
    async fn enqueue(
        &self,
        location: &QueueTableLocation,
        params: &EnqueueParams,
    ) -> Result<i64, DaoError>;

    /// Claim one ready task, or `None` when nothing is due.
    async fn pick_task(
        &self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError>;

    /// Delete a finished task. Returns whether the row existed.
    async fn delete_task(&self, location: &QueueTableLocation, id: i64) -> Result<bool, DaoError>;

    /// Reschedule a task to `now + delay`, reset its attempt counter and
    /// advance its reenqueue-attempt counter. Returns whether the row
    /// existed.
    async fn reenqueue(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError>;

    /// Move a task's `next_process_at` to `now + delay` without touching any
    /// counter. Returns whether the row existed.
    async fn reschedule(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError>;

    /// Open an explicit transaction scoping the same operations.
    async fn begin(&self) -> Result<Box<dyn TaskTransaction>, DaoError>;
}

/// One explicit backend transaction.
///
/// Dropping an uncommitted transaction rolls it back.
#[async_trait]
pub trait TaskTransaction: Send {
    async fn pick_task(
        &mut self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError>;

    async fn delete_task(&mut self, location: &QueueTableLocation, id: i64)
        -> Result<bool, DaoError>;

    async fn reenqueue(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError>;

    async fn reschedule(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError>;

    async fn commit(self: Box<Self>) -> Result<(), DaoError>;

    async fn rollback(self: Box<Self>) -> Result<(), DaoError>;
}
