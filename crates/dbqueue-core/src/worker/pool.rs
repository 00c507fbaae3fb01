//! Execution pool
//!
//! Owns the live worker tasks for one (queue, shard) pair and carries their
//! shared pause, wakeup and cancellation plumbing. Lifecycle methods are
//! expected to be invoked from a single control task, never from the
//! workers themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::queue_loop::QueueWorker;
use crate::listener::ThreadLifecycleListener;
use crate::runner::QueueRunner;
use crate::settings::{DynamicSetting, PollSettings, ProcessingSettings, QueueId};
use crate::shard::QueueShardId;

/// Execution pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Lifecycle operation on a pool that was already shut down.
    #[error("execution pool for queue `{queue_id}` on shard `{shard_id}` is shut down")]
    ShutDown {
        queue_id: QueueId,
        shard_id: QueueShardId,
    },
}

/// One live worker and its cancellation handle.
struct WorkerHandle {
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Worker fleet for one (queue, shard) pair.
///
/// Workers are kept in spawn order so a resize down always cancels the
/// most-recently-added ones first, leaving long-running workers untouched.
pub struct QueueExecutionPool {
    queue_id: QueueId,
    shard_id: QueueShardId,
    runner: QueueRunner,
    processing: Arc<DynamicSetting<ProcessingSettings>>,
    poll: Arc<DynamicSetting<PollSettings>>,
    thread_listener: Arc<dyn ThreadLifecycleListener>,
    workers: Mutex<Vec<WorkerHandle>>,
    /// Cancelled workers that may still be unwinding; swept on every resize.
    draining: Mutex<Vec<JoinHandle<()>>>,
    pause_tx: watch::Sender<bool>,
    wakeup: Arc<Notify>,
    started: AtomicBool,
    shut_down: AtomicBool,
    /// Injected by the pool factory; shared across pools for unique worker
    /// names within the process.
    worker_seq: Arc<AtomicU64>,
}

impl QueueExecutionPool {
    pub(crate) fn new(
        queue_id: QueueId,
        shard_id: QueueShardId,
        runner: QueueRunner,
        processing: Arc<DynamicSetting<ProcessingSettings>>,
        poll: Arc<DynamicSetting<PollSettings>>,
        thread_listener: Arc<dyn ThreadLifecycleListener>,
        worker_seq: Arc<AtomicU64>,
    ) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            queue_id,
            shard_id,
            runner,
            processing,
            poll,
            thread_listener,
            workers: Mutex::new(Vec::new()),
            draining: Mutex::new(Vec::new()),
            pause_tx,
            wakeup: Arc::new(Notify::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            worker_seq,
        }
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn shard_id(&self) -> &QueueShardId {
        &self.shard_id
    }

    /// Spawn the configured number of workers.
    ///
    /// Idempotent: starting an already-started or shut-down pool does
    /// nothing. Must be called within a Tokio runtime.
    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn start(&self) {
        if self.shut_down.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let count = self.processing.get().count;
        info!(count, "starting execution pool");
        self.resize_locked(count);
    }

    /// Change the number of live workers.
    ///
    /// Growing spawns workers that inherit the pool's current pause state;
    /// shrinking cancels the most-recently-added workers first. A no-op
    /// when the count is unchanged. Fails once the pool is shut down, which
    /// lets a settings observer veto thread-count updates that can no
    /// longer be honored.
    pub fn resize(&self, count: usize) -> Result<(), PoolError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown {
                queue_id: self.queue_id.clone(),
                shard_id: self.shard_id.clone(),
            });
        }
        if !self.started.load(Ordering::SeqCst) {
            // not yet spawned; start() will read the live count
            return Ok(());
        }
        self.resize_locked(count);
        Ok(())
    }

    fn resize_locked(&self, target: usize) {
        let mut workers = self.workers.lock();
        self.purge_draining();

        let current = workers.len();
        if target == current {
            return;
        }
        if target > current {
            info!(
                queue_id = %self.queue_id,
                shard_id = %self.shard_id,
                from = current,
                to = target,
                "growing worker pool"
            );
            for _ in current..target {
                workers.push(self.spawn_worker());
            }
        } else {
            info!(
                queue_id = %self.queue_id,
                shard_id = %self.shard_id,
                from = current,
                to = target,
                "shrinking worker pool"
            );
            let mut draining = self.draining.lock();
            while workers.len() > target {
                if let Some(handle) = workers.pop() {
                    handle.cancel.cancel();
                    handle.join.abort();
                    draining.push(handle.join);
                }
            }
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let seq = self.worker_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("queue-{}-{}-{}", self.queue_id, self.shard_id, seq);
        let cancel = CancellationToken::new();
        let worker = QueueWorker {
            worker_name: name.clone(),
            queue_id: self.queue_id.clone(),
            shard_id: self.shard_id.clone(),
            runner: self.runner.clone(),
            poll: Arc::clone(&self.poll),
            thread_listener: Arc::clone(&self.thread_listener),
            pause_rx: self.pause_tx.subscribe(),
            wakeup: Arc::clone(&self.wakeup),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(worker.run());
        WorkerHandle { name, cancel, join }
    }

    /// Names of the live workers in spawn order.
    pub(crate) fn worker_names(&self) -> Vec<String> {
        self.workers.lock().iter().map(|w| w.name.clone()).collect()
    }

    fn purge_draining(&self) {
        self.draining.lock().retain(|join| !join.is_finished());
    }

    /// Pause all live workers after their current cycle.
    pub fn pause(&self) {
        debug!(queue_id = %self.queue_id, shard_id = %self.shard_id, "pausing pool");
        self.pause_tx.send_replace(true);
    }

    /// Resume all live workers.
    pub fn unpause(&self) {
        debug!(queue_id = %self.queue_id, shard_id = %self.shard_id, "unpausing pool");
        self.pause_tx.send_replace(false);
    }

    /// Whether all live workers are paused; vacuously true with none.
    pub fn is_paused(&self) -> bool {
        self.workers.lock().is_empty() || *self.pause_tx.borrow()
    }

    /// Cut every worker's current idle wait short.
    ///
    /// Intended to be called right after a successful enqueue so the new
    /// task is picked up without waiting out the no-task timeout. Crash
    /// waits are unaffected.
    pub fn wakeup(&self) {
        self.wakeup.notify_waiters();
    }

    /// Number of live workers.
    pub fn started_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Hard-stop the pool: cancel and abort every worker. Idempotent.
    ///
    /// In-flight backend transactions roll back per the backend's
    /// semantics; a claimed-but-unresolved task becomes claimable again at
    /// its pre-scheduled crash-retry time.
    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down execution pool");
        self.resize_locked(0);
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Whether the pool is shut down and every worker has finished.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown()
            && self.workers.lock().is_empty()
            && self
                .draining
                .lock()
                .iter()
                .all(|join| join.is_finished())
    }

    /// Wait up to `timeout` for all workers to finish.
    ///
    /// Returns whether termination completed in time.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let all_finished = {
                self.workers.lock().iter().all(|w| w.join.is_finished())
                    && self.draining.lock().iter().all(|join| join.is_finished())
            };
            if all_finished {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl std::fmt::Debug for QueueExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueExecutionPool")
            .field("queue_id", &self.queue_id)
            .field("shard_id", &self.shard_id)
            .field("workers", &self.workers.lock().len())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
