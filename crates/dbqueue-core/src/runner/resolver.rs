//! Task result resolver

use std::sync::Arc;

use tracing::{debug, warn};

use super::DaoAccess;
use crate::backoff;
use crate::settings::{DynamicSetting, QueueTableLocation, ReenqueueSettings};
use crate::task::{TaskExecutionResult, TaskProcessingError, TaskRecord};

/// Translates an execution result into backend mutations.
///
/// All mutations run through the processing mode's [`DaoAccess`], so they
/// land inside the wrapping transaction when one is open.
#[derive(Clone)]
pub(crate) struct TaskResultResolver {
    location: QueueTableLocation,
    reenqueue: Arc<DynamicSetting<ReenqueueSettings>>,
}

impl TaskResultResolver {
    pub(crate) fn new(
        location: QueueTableLocation,
        reenqueue: Arc<DynamicSetting<ReenqueueSettings>>,
    ) -> Self {
        Self {
            location,
            reenqueue,
        }
    }

    /// Apply the result:
    /// - `Finish` deletes the row;
    /// - `Reenqueue` reschedules to `now + delay` (explicit, or computed
    ///   from the reenqueue settings keyed by the row's current
    ///   reenqueue-attempt count) and swaps the attempt counters;
    /// - `Fail` with an explicit delay reschedules;
    /// - a plain `Fail` writes nothing, the claim already pre-scheduled the
    ///   crash-retry time.
    pub(crate) async fn resolve(
        &self,
        record: &TaskRecord,
        result: &TaskExecutionResult,
        access: &mut DaoAccess<'_>,
    ) -> Result<(), TaskProcessingError> {
        match result {
            TaskExecutionResult::Finish => {
                let deleted = access.delete_task(&self.location, record.id).await?;
                if !deleted {
                    warn!(
                        location = %self.location,
                        task_id = record.id,
                        "finished task row was already gone"
                    );
                }
            }
            TaskExecutionResult::Reenqueue { delay } => {
                let delay = match delay {
                    Some(delay) => *delay,
                    None => backoff::reenqueue_delay(
                        &self.reenqueue.get(),
                        record.reenqueue_attempt,
                    )?,
                };
                debug!(
                    location = %self.location,
                    task_id = record.id,
                    delay_ms = delay.as_millis() as u64,
                    "reenqueueing task"
                );
                access.reenqueue(&self.location, record.id, delay).await?;
            }
            TaskExecutionResult::Fail { delay: Some(delay) } => {
                access
                    .reschedule(&self.location, record.id, *delay)
                    .await?;
            }
            TaskExecutionResult::Fail { delay: None } => {
                // claim-time backoff stands, nothing to write
                debug!(
                    location = %self.location,
                    task_id = record.id,
                    "task failed, keeping pre-scheduled retry time"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::persistence::{InMemoryTaskDao, TaskDao};
    use crate::settings::{FailureRetryType, FailureSettings, QueueId};
    use crate::task::EnqueueParams;

    fn location() -> QueueTableLocation {
        QueueTableLocation::new(QueueId::new("resolver"), "task_queue").unwrap()
    }

    fn resolver(settings: ReenqueueSettings) -> TaskResultResolver {
        TaskResultResolver::new(
            location(),
            Arc::new(DynamicSetting::new("resolver.reenqueue", settings)),
        )
    }

    async fn claimed(dao: &InMemoryTaskDao) -> TaskRecord {
        dao.enqueue(&location(), &EnqueueParams::new("p")).await.unwrap();
        dao.pick_task(
            &location(),
            &FailureSettings::new(FailureRetryType::Linear, Duration::from_secs(3600)),
        )
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn finish_deletes_the_row() {
        let dao = InMemoryTaskDao::new();
        let record = claimed(&dao).await;

        let mut access = DaoAccess::Pool(&dao);
        resolver(ReenqueueSettings::manual())
            .resolve(&record, &TaskExecutionResult::finish(), &mut access)
            .await
            .unwrap();

        assert_eq!(dao.task_count(), 0);
    }

    #[tokio::test]
    async fn reenqueue_uses_settings_when_no_explicit_delay() {
        let dao = InMemoryTaskDao::new();
        let record = claimed(&dao).await;

        let mut access = DaoAccess::Pool(&dao);
        resolver(ReenqueueSettings::fixed(Duration::from_secs(10)))
            .resolve(&record, &TaskExecutionResult::reenqueue(), &mut access)
            .await
            .unwrap();

        let row = dao.find_record(record.id).unwrap();
        assert_eq!(row.attempt, 0);
        assert_eq!(row.reenqueue_attempt, 1);
        let delay = row.next_process_at - chrono::Utc::now();
        assert!(delay > chrono::Duration::seconds(8));
        assert!(delay <= chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn manual_reenqueue_without_delay_is_an_error() {
        let dao = InMemoryTaskDao::new();
        let record = claimed(&dao).await;

        let mut access = DaoAccess::Pool(&dao);
        let outcome = resolver(ReenqueueSettings::manual())
            .resolve(&record, &TaskExecutionResult::reenqueue(), &mut access)
            .await;

        assert!(matches!(
            outcome,
            Err(TaskProcessingError::ReenqueueDelay(_))
        ));
        // row untouched
        let row = dao.find_record(record.id).unwrap();
        assert_eq!(row.reenqueue_attempt, 0);
    }

    #[tokio::test]
    async fn plain_fail_writes_nothing() {
        let dao = InMemoryTaskDao::new();
        let record = claimed(&dao).await;
        let before = dao.find_record(record.id).unwrap();

        let mut access = DaoAccess::Pool(&dao);
        resolver(ReenqueueSettings::manual())
            .resolve(&record, &TaskExecutionResult::fail(), &mut access)
            .await
            .unwrap();

        assert_eq!(dao.find_record(record.id).unwrap(), before);
    }

    #[tokio::test]
    async fn fail_with_delay_reschedules_without_touching_counters() {
        let dao = InMemoryTaskDao::new();
        let record = claimed(&dao).await;

        let mut access = DaoAccess::Pool(&dao);
        resolver(ReenqueueSettings::manual())
            .resolve(
                &record,
                &TaskExecutionResult::fail_after(Duration::from_secs(30)),
                &mut access,
            )
            .await
            .unwrap();

        let row = dao.find_record(record.id).unwrap();
        assert_eq!(row.attempt, 1);
        assert_eq!(row.reenqueue_attempt, 0);
        let delay = row.next_process_at - chrono::Utc::now();
        assert!(delay > chrono::Duration::seconds(28));
    }
}
