//! Task processor

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::{DaoAccess, TaskResultResolver};
use crate::consumer::ErasedConsumer;
use crate::listener::TaskLifecycleListener;
use crate::settings::QueueTableLocation;
use crate::shard::QueueShardId;
use crate::task::{TaskProcessingError, TaskRecord};

/// Runs consumer logic on one claimed task and resolves the outcome.
///
/// Processing failures are contained here: the claimed row keeps its
/// pre-scheduled retry time, the failure reaches the `crashed` listener and
/// the worker loop continues normally. Only backend errors in the pick path
/// crash a cycle.
#[derive(Clone)]
pub(crate) struct TaskProcessor {
    shard_id: QueueShardId,
    location: QueueTableLocation,
    consumer: Arc<dyn ErasedConsumer>,
    listener: Arc<dyn TaskLifecycleListener>,
    resolver: TaskResultResolver,
}

impl TaskProcessor {
    pub(crate) fn new(
        shard_id: QueueShardId,
        location: QueueTableLocation,
        consumer: Arc<dyn ErasedConsumer>,
        listener: Arc<dyn TaskLifecycleListener>,
        resolver: TaskResultResolver,
    ) -> Self {
        Self {
            shard_id,
            location,
            consumer,
            listener,
            resolver,
        }
    }

    /// Decode, execute and resolve one claimed task.
    ///
    /// Fires `started`, then `executed` (with the result and elapsed time)
    /// or `crashed`, and `finished` in every case.
    pub(crate) async fn process(&self, record: &TaskRecord, access: &mut DaoAccess<'_>) {
        self.listener.started(&self.shard_id, &self.location, record);
        let started = Instant::now();

        match self.consumer.execute_raw(record).await {
            Ok(result) => {
                self.listener.executed(
                    &self.shard_id,
                    &self.location,
                    record,
                    &result,
                    started.elapsed(),
                );
                if let Err(error) = self.resolver.resolve(record, &result, access).await {
                    warn!(
                        location = %self.location,
                        task_id = record.id,
                        %error,
                        "task result resolution failed"
                    );
                    self.listener
                        .crashed(&self.shard_id, &self.location, record, &error);
                }
            }
            Err(error) => {
                warn!(
                    location = %self.location,
                    task_id = record.id,
                    %error,
                    "task execution failed"
                );
                self.listener
                    .crashed(&self.shard_id, &self.location, record, &error);
            }
        }

        self.listener.finished(&self.shard_id, &self.location, record);
    }
}
