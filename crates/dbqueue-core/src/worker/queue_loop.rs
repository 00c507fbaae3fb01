//! Worker loop state machine
//!
//! One worker is one straight-line loop: block while paused, run one
//! pick-execute-resolve cycle, wait, repeat. The loop never dies on backend
//! failures; it answers them with the fatal-crash wait and retries forever.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::wait;
use crate::listener::ThreadLifecycleListener;
use crate::runner::{QueueProcessingStatus, QueueRunner};
use crate::settings::{DynamicSetting, PollSettings, QueueId};
use crate::shard::QueueShardId;

/// One worker of an execution pool.
pub(crate) struct QueueWorker {
    pub(crate) worker_name: String,
    pub(crate) queue_id: QueueId,
    pub(crate) shard_id: QueueShardId,
    pub(crate) runner: QueueRunner,
    pub(crate) poll: Arc<DynamicSetting<PollSettings>>,
    pub(crate) thread_listener: Arc<dyn ThreadLifecycleListener>,
    pub(crate) pause_rx: watch::Receiver<bool>,
    pub(crate) wakeup: Arc<Notify>,
    pub(crate) cancel: CancellationToken,
}

impl QueueWorker {
    /// Run until cancelled.
    ///
    /// Per cycle: fire `started`, run the queue, fire `executed` (with
    /// whether a task was found and the busy time) or `crashed`, always
    /// fire `finished`, then wait. The idle wait is between-task-timeout
    /// after a processed task and no-task-timeout otherwise, and a wakeup
    /// cuts it short. The crash wait is fatal-crash-timeout and ignores
    /// wakeups.
    #[instrument(skip(self), fields(worker = %self.worker_name))]
    pub(crate) async fn run(mut self) {
        debug!("worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.block_while_paused().await {
                break;
            }

            self.thread_listener.started(&self.queue_id, &self.shard_id);
            let cycle_started = Instant::now();

            match self.runner.run_queue().await {
                Ok(status) => {
                    let task_processed = status == QueueProcessingStatus::Processed;
                    self.thread_listener.executed(
                        &self.queue_id,
                        &self.shard_id,
                        task_processed,
                        cycle_started.elapsed(),
                    );
                    self.thread_listener.finished(&self.queue_id, &self.shard_id);

                    let poll = self.poll.get();
                    let timeout = if task_processed {
                        poll.between_task_timeout
                    } else {
                        poll.no_task_timeout
                    };
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = wait::idle_sleep(timeout, &self.wakeup) => {}
                    }
                }
                Err(error) => {
                    warn!(%error, "queue cycle crashed, backing off");
                    self.thread_listener
                        .crashed(&self.queue_id, &self.shard_id, &error);
                    self.thread_listener.finished(&self.queue_id, &self.shard_id);

                    // floor on retry spacing after systemic failure; wakeups
                    // must not shorten this
                    wait::crash_sleep(self.poll.get().fatal_crash_timeout).await;
                }
            }
        }
        debug!("worker stopped");
    }

    /// Block while the pool is paused.
    ///
    /// Returns `false` when the worker should exit instead of resuming.
    async fn block_while_paused(&mut self) -> bool {
        while *self.pause_rx.borrow() {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.pause_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }
}
