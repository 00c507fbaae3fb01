//! Queue runners
//!
//! A runner orchestrates one pick-execute-resolve cycle under the queue's
//! processing mode. Worker loops call [`QueueRunner::run_queue`] once per
//! cycle and use the returned status to choose their idle wait.

mod picker;
mod processor;
mod resolver;

pub(crate) use picker::TaskPicker;
pub(crate) use processor::TaskProcessor;
pub(crate) use resolver::TaskResultResolver;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::persistence::{DaoError, TaskDao, TaskTransaction};
use crate::settings::{DynamicSetting, FailureSettings, ProcessingMode, ProcessingSettings, QueueTableLocation};
use crate::spawner::TaskSpawner;
use crate::task::TaskRecord;

/// Errors that crash a worker cycle.
#[derive(Debug, thiserror::Error)]
pub enum QueueRunnerError {
    /// The backend failed during pick or transaction management.
    #[error(transparent)]
    Dao(#[from] DaoError),

    /// The queue is configured for external execution but no spawner was
    /// supplied to the queue service.
    #[error("processing mode use-external-executor requires a task spawner")]
    MissingSpawner,
}

/// Whether a cycle found work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueProcessingStatus {
    Processed,
    Skipped,
}

/// Uniform access to the mutating DAO operations, either on the pool
/// (implicit per-statement transactions) or inside one explicit
/// transaction.
pub(crate) enum DaoAccess<'a> {
    Pool(&'a dyn TaskDao),
    Transaction(&'a mut dyn TaskTransaction),
}

impl DaoAccess<'_> {
    pub(crate) async fn pick_task(
        &mut self,
        location: &QueueTableLocation,
        settings: &FailureSettings,
    ) -> Result<Option<TaskRecord>, DaoError> {
        match self {
            Self::Pool(dao) => dao.pick_task(location, settings).await,
            Self::Transaction(tx) => tx.pick_task(location, settings).await,
        }
    }

    pub(crate) async fn delete_task(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
    ) -> Result<bool, DaoError> {
        match self {
            Self::Pool(dao) => dao.delete_task(location, id).await,
            Self::Transaction(tx) => tx.delete_task(location, id).await,
        }
    }

    pub(crate) async fn reenqueue(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        match self {
            Self::Pool(dao) => dao.reenqueue(location, id, delay).await,
            Self::Transaction(tx) => tx.reenqueue(location, id, delay).await,
        }
    }

    pub(crate) async fn reschedule(
        &mut self,
        location: &QueueTableLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, DaoError> {
        match self {
            Self::Pool(dao) => dao.reschedule(location, id, delay).await,
            Self::Transaction(tx) => tx.reschedule(location, id, delay).await,
        }
    }
}

/// One queue's pick-execute-resolve orchestrator.
///
/// The processing mode is re-read from the live settings on every cycle, so
/// a hot mode change takes effect on the next cycle without a restart.
#[derive(Clone)]
pub(crate) struct QueueRunner {
    picker: TaskPicker,
    processor: TaskProcessor,
    dao: Arc<dyn TaskDao>,
    processing: Arc<DynamicSetting<ProcessingSettings>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
}

impl QueueRunner {
    pub(crate) fn new(
        picker: TaskPicker,
        processor: TaskProcessor,
        dao: Arc<dyn TaskDao>,
        processing: Arc<DynamicSetting<ProcessingSettings>>,
        spawner: Option<Arc<dyn TaskSpawner>>,
    ) -> Self {
        Self {
            picker,
            processor,
            dao,
            processing,
            spawner,
        }
    }

    /// Run one cycle under the currently configured processing mode.
    pub(crate) async fn run_queue(&self) -> Result<QueueProcessingStatus, QueueRunnerError> {
        match self.processing.get().mode {
            ProcessingMode::SeparateTransactions => self.run_in_separate_transactions().await,
            ProcessingMode::WrapInTransaction => self.run_in_transaction().await,
            ProcessingMode::UseExternalExecutor => self.run_with_external_executor().await,
        }
    }

    /// Pick in its own transaction, execute without one, resolve in another.
    async fn run_in_separate_transactions(
        &self,
    ) -> Result<QueueProcessingStatus, QueueRunnerError> {
        let mut access = DaoAccess::Pool(&*self.dao);
        let Some(record) = self.picker.pick(&mut access).await? else {
            return Ok(QueueProcessingStatus::Skipped);
        };
        self.processor.process(&record, &mut access).await;
        Ok(QueueProcessingStatus::Processed)
    }

    /// Pick, execute and resolve inside one backend transaction.
    ///
    /// The transaction commits even when consumer logic failed: the pick
    /// already advanced the row's retry schedule inside this transaction,
    /// and rolling that back would make the row claimable immediately.
    async fn run_in_transaction(&self) -> Result<QueueProcessingStatus, QueueRunnerError> {
        let mut tx = self.dao.begin().await?;
        let mut access = DaoAccess::Transaction(&mut *tx);
        let Some(record) = self.picker.pick(&mut access).await? else {
            tx.rollback().await?;
            return Ok(QueueProcessingStatus::Skipped);
        };
        self.processor.process(&record, &mut access).await;
        tx.commit().await?;
        Ok(QueueProcessingStatus::Processed)
    }

    /// Pick in the worker loop, then hand execution and resolution to the
    /// external spawner without waiting for completion.
    async fn run_with_external_executor(&self) -> Result<QueueProcessingStatus, QueueRunnerError> {
        let spawner = self.spawner.as_ref().ok_or(QueueRunnerError::MissingSpawner)?;
        let mut access = DaoAccess::Pool(&*self.dao);
        let Some(record) = self.picker.pick(&mut access).await? else {
            return Ok(QueueProcessingStatus::Skipped);
        };

        let processor = self.processor.clone();
        let dao = Arc::clone(&self.dao);
        debug!(task_id = record.id, "handing task to external executor");
        spawner.spawn(Box::pin(async move {
            let mut access = DaoAccess::Pool(&*dao);
            processor.process(&record, &mut access).await;
        }));
        Ok(QueueProcessingStatus::Processed)
    }
}
