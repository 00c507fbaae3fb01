//! Queue producer
//!
//! Typed enqueue path: serialize the payload, route to a shard, insert the
//! row. Pair with [`QueueService::wakeup`](crate::service::QueueService::wakeup)
//! right after a successful enqueue when pick latency matters.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::payload::{PayloadError, PayloadTransformer};
use crate::persistence::DaoError;
use crate::settings::QueueTableLocation;
use crate::shard::{QueueShard, QueueShardId, QueueShardRouter};
use crate::task::EnqueueParams;

/// Enqueue errors.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// Payload serialization failed.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Backend insert failed.
    #[error(transparent)]
    Dao(#[from] DaoError),

    /// The router resolved a shard the producer does not know.
    #[error("router resolved unknown shard `{0}`")]
    UnknownShard(QueueShardId),
}

/// Where a task landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueResult {
    pub shard_id: QueueShardId,
    pub enqueue_id: i64,
}

/// Options for one enqueue call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Initial scheduling delay; zero makes the task immediately claimable.
    pub delay: Duration,
    /// Values for caller-configured extra columns.
    pub extra: std::collections::BTreeMap<String, String>,
}

impl EnqueueOptions {
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

/// Typed producer for one queue across its shards.
pub struct QueueProducer<T> {
    location: QueueTableLocation,
    transformer: Arc<dyn PayloadTransformer<T>>,
    router: Arc<dyn QueueShardRouter>,
    shards: Vec<QueueShard>,
}

impl<T> QueueProducer<T> {
    pub fn new(
        location: QueueTableLocation,
        transformer: Arc<dyn PayloadTransformer<T>>,
        router: Arc<dyn QueueShardRouter>,
        shards: Vec<QueueShard>,
    ) -> Self {
        Self {
            location,
            transformer,
            router,
            shards,
        }
    }

    /// Enqueue with no delay.
    pub async fn enqueue(&self, payload: &T) -> Result<EnqueueResult, EnqueueError> {
        self.enqueue_with(payload, EnqueueOptions::default()).await
    }

    /// Enqueue with explicit options.
    pub async fn enqueue_with(
        &self,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult, EnqueueError> {
        let params = EnqueueParams {
            payload: self.transformer.from_object(payload)?,
            delay: options.delay,
            extra: options.extra,
        };

        let shard_id = self.router.resolve_shard_id(&params);
        let shard = self
            .shards
            .iter()
            .find(|shard| *shard.shard_id() == shard_id)
            .ok_or_else(|| EnqueueError::UnknownShard(shard_id.clone()))?;

        let enqueue_id = shard.dao().enqueue(&self.location, &params).await?;
        debug!(
            location = %self.location,
            shard_id = %shard_id,
            enqueue_id,
            delay_ms = params.delay.as_millis() as u64,
            "task enqueued"
        );
        Ok(EnqueueResult {
            shard_id,
            enqueue_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::StringPayloadTransformer;
    use crate::persistence::InMemoryTaskDao;
    use crate::settings::QueueId;
    use crate::shard::SingleQueueShardRouter;

    fn location() -> QueueTableLocation {
        QueueTableLocation::new(QueueId::new("producer"), "task_queue").unwrap()
    }

    #[tokio::test]
    async fn enqueue_routes_to_the_resolved_shard() {
        let dao = InMemoryTaskDao::new();
        let producer = QueueProducer::new(
            location(),
            Arc::new(StringPayloadTransformer),
            Arc::new(SingleQueueShardRouter::new(QueueShardId::new("main"))),
            vec![QueueShard::new(
                QueueShardId::new("main"),
                Arc::new(dao.clone()),
            )],
        );

        let result = producer.enqueue(&"p1".to_string()).await.unwrap();
        assert_eq!(result.shard_id, QueueShardId::new("main"));
        assert_eq!(dao.task_count(), 1);
        assert_eq!(dao.find_record(result.enqueue_id).unwrap().payload, "p1");
    }

    #[tokio::test]
    async fn unknown_shard_is_a_caller_error() {
        let producer: QueueProducer<String> = QueueProducer::new(
            location(),
            Arc::new(StringPayloadTransformer),
            Arc::new(SingleQueueShardRouter::new(QueueShardId::new("elsewhere"))),
            vec![QueueShard::new(
                QueueShardId::new("main"),
                Arc::new(InMemoryTaskDao::new()),
            )],
        );

        assert!(matches!(
            producer.enqueue(&"p1".to_string()).await,
            Err(EnqueueError::UnknownShard(_))
        ));
    }
}
