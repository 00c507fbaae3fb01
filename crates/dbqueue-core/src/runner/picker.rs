//! Task picker

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use super::DaoAccess;
use crate::listener::TaskLifecycleListener;
use crate::persistence::DaoError;
use crate::settings::{DynamicSetting, FailureSettings, QueueTableLocation};
use crate::shard::QueueShardId;
use crate::task::TaskRecord;

/// Claims one ready row for its queue and shard.
///
/// The claim itself is delegated to the backend pick operation, which also
/// pre-schedules the crash-retry time per the live failure settings.
/// Backend errors propagate uncaught to the worker loop's crash path.
#[derive(Clone)]
pub(crate) struct TaskPicker {
    shard_id: QueueShardId,
    location: QueueTableLocation,
    failure: Arc<DynamicSetting<FailureSettings>>,
    listener: Arc<dyn TaskLifecycleListener>,
}

impl TaskPicker {
    pub(crate) fn new(
        shard_id: QueueShardId,
        location: QueueTableLocation,
        failure: Arc<DynamicSetting<FailureSettings>>,
        listener: Arc<dyn TaskLifecycleListener>,
    ) -> Self {
        Self {
            shard_id,
            location,
            failure,
            listener,
        }
    }

    /// Claim one ready task, measuring wall-clock pick latency.
    ///
    /// Fires `picked` when a row is returned; an empty pick is silent.
    pub(crate) async fn pick(
        &self,
        access: &mut DaoAccess<'_>,
    ) -> Result<Option<TaskRecord>, DaoError> {
        let started = Instant::now();
        let settings = self.failure.get();
        let picked = access.pick_task(&self.location, &settings).await?;

        match &picked {
            Some(record) => {
                self.listener
                    .picked(&self.shard_id, &self.location, record, started.elapsed());
            }
            None => {
                trace!(location = %self.location, "no ready task");
            }
        }
        Ok(picked)
    }
}
