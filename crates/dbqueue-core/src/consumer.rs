//! Queue consumer contract

use std::sync::Arc;

use async_trait::async_trait;

use crate::payload::PayloadTransformer;
use crate::settings::QueueConfig;
use crate::task::{BoxError, Task, TaskExecutionResult, TaskProcessingError, TaskRecord};

/// Business logic attached to one queue.
///
/// A consumer owns its queue configuration and payload transformer and is
/// registered once with the queue service, which then runs it on every
/// shard.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use dbqueue_core::consumer::QueueConsumer;
/// use dbqueue_core::payload::{PayloadTransformer, StringPayloadTransformer};
/// use dbqueue_core::settings::{QueueConfig, QueueId, QueueSettings, QueueTableLocation};
/// use dbqueue_core::task::{BoxError, Task, TaskExecutionResult};
///
/// struct EmailConsumer {
///     config: QueueConfig,
///     transformer: StringPayloadTransformer,
/// }
///
/// #[async_trait]
/// impl QueueConsumer for EmailConsumer {
///     type Payload = String;
///
///     fn queue_config(&self) -> &QueueConfig {
///         &self.config
///     }
///
///     fn payload_transformer(&self) -> &dyn PayloadTransformer<String> {
///         &self.transformer
///     }
///
///     async fn execute(&self, task: Task<String>) -> Result<TaskExecutionResult, BoxError> {
///         println!("sending {}", task.payload);
///         Ok(TaskExecutionResult::finish())
///     }
/// }
/// ```
#[async_trait]
pub trait QueueConsumer: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// Configuration of the queue this consumer serves.
    fn queue_config(&self) -> &QueueConfig;

    /// Transformer between row payload text and [`Self::Payload`].
    fn payload_transformer(&self) -> &dyn PayloadTransformer<Self::Payload>;

    /// Process one claimed task.
    ///
    /// Returning `Err` counts as a crash: the task stays on its
    /// pre-scheduled retry schedule and the error reaches the task-level
    /// `crashed` listener.
    async fn execute(&self, task: Task<Self::Payload>) -> Result<TaskExecutionResult, BoxError>;
}

/// Type-erased consumer used by the processing internals.
#[async_trait]
pub(crate) trait ErasedConsumer: Send + Sync {
    async fn execute_raw(
        &self,
        record: &TaskRecord,
    ) -> Result<TaskExecutionResult, TaskProcessingError>;
}

/// Adapter decoding the raw payload before delegating to a typed consumer.
pub(crate) struct ConsumerAdapter<C: QueueConsumer> {
    inner: Arc<C>,
}

impl<C: QueueConsumer> ConsumerAdapter<C> {
    pub(crate) fn new(inner: Arc<C>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: QueueConsumer> ErasedConsumer for ConsumerAdapter<C> {
    async fn execute_raw(
        &self,
        record: &TaskRecord,
    ) -> Result<TaskExecutionResult, TaskProcessingError> {
        let payload = self
            .inner
            .payload_transformer()
            .to_object(&record.payload)?;
        let task = Task::from_record(record, payload);
        self.inner
            .execute(task)
            .await
            .map_err(TaskProcessingError::Execution)
    }
}
