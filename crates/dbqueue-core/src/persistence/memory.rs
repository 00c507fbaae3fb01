//! In-memory implementation of the storage contract for testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::dao::{DaoError, TaskDao, TaskTransaction};
use crate::backoff;
use crate::settings::{FailureSettings, QueueTableLocation};
use crate::task::{EnqueueParams, TaskRecord};

/// One stored row.
#[derive(Debug, Clone)]
struct StoredTask {
    table_name: String,
    queue_name: String,
    payload: String,
    attempt: u32,
    reenqueue_attempt: u32,
    total_attempt: u64,
    created_at: DateTime<Utc>,
    next_process_at: DateTime<Utc>,
    extra: BTreeMap<String, String>,
}

struct Inner {
    tasks: RwLock<BTreeMap<i64, StoredTask>>,
    next_id: AtomicI64,
}

/// In-memory implementation of [`TaskDao`].
///
/// Primarily for testing: it mirrors the claim semantics of the SQL
/// backends (single claim per row, backoff pre-scheduling, counter
/// arithmetic) under one process-wide lock. Cloning yields a handle to the
/// same store. Explicit transactions apply their mutations immediately and
/// cannot roll back.
///
/// # Example
///
/// ```
/// use dbqueue_core::persistence::InMemoryTaskDao;
///
/// let dao = InMemoryTaskDao::new();
/// assert_eq!(dao.task_count(), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryTaskDao {
    inner: Arc<Inner>,
}

impl Default for InMemoryTaskDao {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskDao {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
            }),
        }
    }

    /// Number of stored tasks across all queues.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.read().len()
    }

    /// Snapshot one row as a record, for test assertions.
    pub fn find_record(&self, id: i64) -> Option<TaskRecord> {
        self.inner.tasks.read().get(&id).map(|task| to_record(id, task))
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.inner.tasks.write().clear();
    }

    fn enqueue_sync(&self, location: &QueueTableLocation, params: &EnqueueParams) -> i64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.inner.tasks.write().insert(
            id,
            StoredTask {
                table_name: location.table_name().to_string(),
                queue_name: location.queue_id().to_string(),
                payload: params.payload.clone(),
                attempt: 0,
                reenqueue_attempt: 0,
                total_attempt: 0,
                created_at: now,
                next_process_at: now + to_chrono(params.delay),
                extra: params.extra.clone(),
            },
        );
        id
    }

    fn pick_sync(
        &self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Option<TaskRecord> {
        let mut tasks = self.inner.tasks.write();
        let now = Utc::now();
        let picked_id = tasks
            .iter()
            .filter(|(_, task)| {
                task.table_name == location.table_name()
                    && task.queue_name == location.queue_id().as_str()
                    && task.next_process_at <= now
            })
            .min_by_key(|(id, task)| (task.next_process_at, **id))
            .map(|(id, _)| *id)?;

        let task = tasks.get_mut(&picked_id)?;
        // pre-schedule the crash-retry time from the pre-increment attempt
        task.next_process_at = now + to_chrono(backoff::failure_delay(settings, task.attempt));
        task.attempt += 1;
        task.total_attempt += 1;
        Some(to_record(picked_id, task))
    }

    fn delete_sync(&self, location: &QueueTableLocation, id: i64) -> bool {
        let mut tasks = self.inner.tasks.write();
        match tasks.get(&id) {
            Some(task) if task.queue_name == location.queue_id().as_str() => {
                tasks.remove(&id);
                true
            }
            _ => false,
        }
    }

    fn reenqueue_sync(&self, location: &QueueTableLocation, id: i64, delay: Duration) -> bool {
        let mut tasks = self.inner.tasks.write();
        match tasks.get_mut(&id) {
            Some(task) if task.queue_name == location.queue_id().as_str() => {
                task.next_process_at = Utc::now() + to_chrono(delay);
                task.attempt = 0;
                task.reenqueue_attempt += 1;
                true
            }
            _ => false,
        }
    }

    fn reschedule_sync(&self, location: &QueueTableLocation, id: i64, delay: Duration) -> bool {
        let mut tasks = self.inner.tasks.write();
        match tasks.get_mut(&id) {
            Some(task) if task.queue_name == location.queue_id().as_str() => {
                task.next_process_at = Utc::now() + to_chrono(delay);
                true
            }
            _ => false,
        }
    }
}

fn to_record(id: i64, task: &StoredTask) -> TaskRecord {
    TaskRecord {
        id,
        payload: task.payload.clone(),
        attempt: task.attempt,
        reenqueue_attempt: task.reenqueue_attempt,
        total_attempt: task.total_attempt,
        created_at: task.created_at,
        next_process_at: task.next_process_at,
        extra: task.extra.clone(),
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
}

#[async_trait]
impl TaskDao for InMemoryTaskDao {
    async fn enqueue(
        &self,
        location: &QueueTableLocation,
        params: &EnqueueParams,
    ) -> Result<i64, DaoError> {
        Ok(self.enqueue_sync(location, params))
    }

    async fn pick_task(
        &self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError> {
        Ok(self.pick_sync(location, settings))
    }

    async fn delete_task(&self, location: &QueueTableLocation, id: i64) -> Result<bool, DaoError> {
        Ok(self.delete_sync(location, id))
    }

    async fn reenqueue(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        Ok(self.reenqueue_sync(location, id, delay))
    }

    async fn reschedule(
        &self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        Ok(self.reschedule_sync(location, id, delay))
    }

    async fn begin(&self) -> Result<Box<dyn TaskTransaction>, DaoError> {
        Ok(Box::new(InMemoryTaskTransaction { dao: self.clone() }))
    }
}

/// Immediate-apply transaction over the in-memory store.
struct InMemoryTaskTransaction {
    dao: InMemoryTaskDao,
}

#[async_trait]
impl TaskTransaction for InMemoryTaskTransaction {
    async fn pick_task(
        &mut self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError> {
        Ok(self.dao.pick_sync(location, settings))
    }

    async fn delete_task(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
    ) -> Result<bool, DaoError> {
        Ok(self.dao.delete_sync(location, id))
    }

    async fn reenqueue(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        Ok(self.dao.reenqueue_sync(location, id, delay))
    }

    async fn reschedule(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        Ok(self.dao.reschedule_sync(location, id, delay))
    }

    async fn commit(self: Box<Self>) -> Result<(), DaoError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DaoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FailureRetryType, QueueId};

    fn location() -> QueueTableLocation {
        QueueTableLocation::new(QueueId::new("example"), "task_queue").unwrap()
    }

    fn geometric_1s() -> FailureSettings {
        FailureSettings::new(FailureRetryType::Geometric, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn enqueue_then_pick_then_delete() {
        let dao = InMemoryTaskDao::new();
        let id = dao
            .enqueue(&location(), &EnqueueParams::new("p1"))
            .await
            .unwrap();

        let record = dao
            .pick_task(&location(), &geometric_1s())
            .await
            .unwrap()
            .expect("task should be ready");
        assert_eq!(record.id, id);
        assert_eq!(record.payload, "p1");
        assert_eq!(record.attempt, 1);
        assert_eq!(record.total_attempt, 1);

        assert!(dao.delete_task(&location(), id).await.unwrap());
        assert_eq!(dao.pick_task(&location(), &geometric_1s()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delayed_task_is_not_claimable() {
        let dao = InMemoryTaskDao::new();
        dao.enqueue(
            &location(),
            &EnqueueParams::new("later").with_delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();

        assert_eq!(dao.pick_task(&location(), &geometric_1s()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pick_prevents_immediate_reclaim() {
        let dao = InMemoryTaskDao::new();
        dao.enqueue(&location(), &EnqueueParams::new("once"))
            .await
            .unwrap();

        assert!(dao
            .pick_task(&location(), &geometric_1s())
            .await
            .unwrap()
            .is_some());
        // the claim moved next_process_at one backoff interval out
        assert_eq!(dao.pick_task(&location(), &geometric_1s()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reenqueue_resets_attempt_and_advances_reenqueue_attempt() {
        let dao = InMemoryTaskDao::new();
        let id = dao
            .enqueue(&location(), &EnqueueParams::new("again"))
            .await
            .unwrap();
        dao.pick_task(&location(), &geometric_1s()).await.unwrap();

        assert!(dao
            .reenqueue(&location(), id, Duration::ZERO)
            .await
            .unwrap());
        let record = dao.find_record(id).unwrap();
        assert_eq!(record.attempt, 0);
        assert_eq!(record.reenqueue_attempt, 1);
        assert_eq!(record.total_attempt, 1);
    }

    #[tokio::test]
    async fn queues_do_not_see_each_other() {
        let dao = InMemoryTaskDao::new();
        let other = QueueTableLocation::new(QueueId::new("other"), "task_queue").unwrap();
        dao.enqueue(&location(), &EnqueueParams::new("mine"))
            .await
            .unwrap();

        assert_eq!(dao.pick_task(&other, &geometric_1s()).await.unwrap(), None);
    }
}
