//! Queue service
//!
//! Registry of execution pools across all (queue, shard) pairs, with
//! aggregate lifecycle operations and the entry point for configuration hot
//! updates. Lifecycle methods are meant to be driven from a single control
//! task at startup and shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::consumer::{ConsumerAdapter, ErasedConsumer, QueueConsumer};
use crate::listener::{
    NoopTaskListener, NoopThreadListener, TaskLifecycleListener, ThreadLifecycleListener,
};
use crate::runner::{QueueRunner, TaskPicker, TaskProcessor, TaskResultResolver};
use crate::settings::{
    DynamicQueueSettings, ObserverVeto, ProcessingMode, QueueConfig, QueueId,
};
use crate::shard::{QueueShard, QueueShardId};
use crate::spawner::TaskSpawner;
use crate::worker::{PoolError, QueueExecutionPool};

/// Queue service errors.
///
/// All of these are caller errors surfaced synchronously; runtime task
/// failures never appear here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service was built without shards.
    #[error("no shards configured")]
    NoShards,

    /// Operation referenced a queue that was never registered.
    #[error("queue `{0}` is not registered")]
    UnknownQueue(QueueId),

    /// Config update referenced queues that were never registered.
    #[error("unknown queues in config update: {}", .0.join(", "))]
    UnknownQueues(Vec<String>),

    /// Operation referenced a shard the queue does not run on.
    #[error("queue `{queue_id}` has no shard `{shard_id}`")]
    UnknownShard {
        queue_id: QueueId,
        shard_id: QueueShardId,
    },

    /// Queue wants external execution but no spawner was supplied.
    #[error("queue `{0}` uses an external executor but the service has no task spawner")]
    MissingSpawner(QueueId),

    /// A targeted pool operation failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// One registered queue: its live settings and one pool per shard.
struct RegisteredQueue {
    settings: DynamicQueueSettings,
    pools: BTreeMap<QueueShardId, Arc<QueueExecutionPool>>,
}

/// Registry and lifecycle root for all queues of one application.
///
/// Build it over the application's shards, register one consumer per queue,
/// then drive the aggregate lifecycle:
///
/// ```ignore
/// let shard = QueueShard::new(QueueShardId::new("main"), Arc::new(dao));
/// let service = Arc::new(QueueService::new(vec![shard]));
/// service.register(Arc::new(EmailConsumer::new()))?;
/// service.start_all();
/// // ... on shutdown:
/// service.shutdown_all();
/// service.await_termination_all(Duration::from_secs(30)).await;
/// ```
pub struct QueueService {
    shards: Vec<QueueShard>,
    task_listener: Arc<dyn TaskLifecycleListener>,
    thread_listener: Arc<dyn ThreadLifecycleListener>,
    spawner: Option<Arc<dyn TaskSpawner>>,
    registry: RwLock<BTreeMap<QueueId, RegisteredQueue>>,
    worker_seq: Arc<AtomicU64>,
}

impl QueueService {
    /// Create a service over the given shards with no-op listeners.
    pub fn new(shards: Vec<QueueShard>) -> Self {
        Self {
            shards,
            task_listener: Arc::new(NoopTaskListener),
            thread_listener: Arc::new(NoopThreadListener),
            spawner: None,
            registry: RwLock::new(BTreeMap::new()),
            worker_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a task-level lifecycle listener
    pub fn with_task_listener(mut self, listener: Arc<dyn TaskLifecycleListener>) -> Self {
        self.task_listener = listener;
        self
    }

    /// Attach a worker-cycle lifecycle listener
    pub fn with_thread_listener(mut self, listener: Arc<dyn ThreadLifecycleListener>) -> Self {
        self.thread_listener = listener;
        self
    }

    /// Supply the executor used by use-external-executor queues
    pub fn with_task_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Register a consumer, creating one execution pool per shard.
    ///
    /// Returns `Ok(false)` without touching anything when the queue id is
    /// already registered. Subscribes each pool to the queue's processing
    /// settings so live thread-count edits resize the pools in place.
    #[instrument(skip_all, fields(queue_id = %consumer.queue_config().queue_id()))]
    pub fn register<C: QueueConsumer>(&self, consumer: Arc<C>) -> Result<bool, ServiceError> {
        if self.shards.is_empty() {
            return Err(ServiceError::NoShards);
        }

        let config = consumer.queue_config().clone();
        let queue_id = config.queue_id().clone();

        let mut registry = self.registry.write();
        if registry.contains_key(&queue_id) {
            warn!("queue already registered");
            return Ok(false);
        }
        if config.settings.processing.mode == ProcessingMode::UseExternalExecutor
            && self.spawner.is_none()
        {
            return Err(ServiceError::MissingSpawner(queue_id));
        }

        let settings = DynamicQueueSettings::new(&queue_id, config.settings.clone());
        let erased: Arc<dyn ErasedConsumer> = Arc::new(ConsumerAdapter::new(consumer));
        let has_spawner = self.spawner.is_some();

        let mut pools = BTreeMap::new();
        for shard in &self.shards {
            let picker = TaskPicker::new(
                shard.shard_id().clone(),
                config.location.clone(),
                Arc::clone(settings.failure()),
                Arc::clone(&self.task_listener),
            );
            let resolver = TaskResultResolver::new(
                config.location.clone(),
                Arc::clone(settings.reenqueue()),
            );
            let processor = TaskProcessor::new(
                shard.shard_id().clone(),
                config.location.clone(),
                Arc::clone(&erased),
                Arc::clone(&self.task_listener),
                resolver,
            );
            let runner = QueueRunner::new(
                picker,
                processor,
                Arc::clone(shard.dao()),
                Arc::clone(settings.processing()),
                self.spawner.clone(),
            );
            let pool = Arc::new(QueueExecutionPool::new(
                queue_id.clone(),
                shard.shard_id().clone(),
                runner,
                Arc::clone(settings.processing()),
                Arc::clone(settings.poll()),
                Arc::clone(&self.thread_listener),
                Arc::clone(&self.worker_seq),
            ));

            // live thread-count updates resize this pool; the pool (or a
            // missing spawner) can veto the whole settings update
            let pool_ref = Arc::downgrade(&pool);
            let observer_queue = queue_id.clone();
            settings.processing().register_observer(move |_old, new| {
                if new.mode == ProcessingMode::UseExternalExecutor && !has_spawner {
                    return Err(ObserverVeto::new(format!(
                        "queue `{observer_queue}` cannot switch to use-external-executor without a task spawner"
                    )));
                }
                match pool_ref.upgrade() {
                    Some(pool) => pool
                        .resize(new.count)
                        .map_err(|error| ObserverVeto::new(error.to_string())),
                    None => Ok(()),
                }
            });

            pools.insert(shard.shard_id().clone(), pool);
        }

        registry.insert(queue_id, RegisteredQueue { settings, pools });
        info!(shards = self.shards.len(), "queue registered");
        Ok(true)
    }

    /// Registered queue ids, sorted.
    pub fn registered_queues(&self) -> Vec<QueueId> {
        self.registry.read().keys().cloned().collect()
    }

    /// Start every registered queue.
    pub fn start_all(&self) {
        for pool in self.all_pools() {
            pool.start();
        }
    }

    /// Start one queue on all its shards.
    pub fn start(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        for pool in self.queue_pools(queue_id)? {
            pool.start();
        }
        Ok(())
    }

    /// Pause every registered queue.
    pub fn pause_all(&self) {
        for pool in self.all_pools() {
            pool.pause();
        }
    }

    /// Pause one queue on all its shards.
    pub fn pause(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        for pool in self.queue_pools(queue_id)? {
            pool.pause();
        }
        Ok(())
    }

    /// Unpause every registered queue.
    pub fn unpause_all(&self) {
        for pool in self.all_pools() {
            pool.unpause();
        }
    }

    /// Unpause one queue on all its shards.
    pub fn unpause(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        for pool in self.queue_pools(queue_id)? {
            pool.unpause();
        }
        Ok(())
    }

    /// Whether every pool of the queue is paused.
    pub fn is_paused(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.queue_pools(queue_id)?.iter().all(|p| p.is_paused()))
    }

    /// Whether every pool of every queue is paused.
    pub fn is_all_paused(&self) -> bool {
        self.all_pools().iter().all(|p| p.is_paused())
    }

    /// Shut down every registered queue.
    pub fn shutdown_all(&self) {
        for pool in self.all_pools() {
            pool.shutdown();
        }
    }

    /// Shut down one queue on all its shards.
    pub fn shutdown(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        for pool in self.queue_pools(queue_id)? {
            pool.shutdown();
        }
        Ok(())
    }

    /// Whether the queue has been shut down on all its shards.
    pub fn is_shutdown(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.queue_pools(queue_id)?.iter().all(|p| p.is_shutdown()))
    }

    /// Whether every registered queue has been shut down.
    pub fn is_all_shutdown(&self) -> bool {
        self.all_pools().iter().all(|p| p.is_shutdown())
    }

    /// Whether the queue is shut down and all its workers finished.
    pub fn is_terminated(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.queue_pools(queue_id)?.iter().all(|p| p.is_terminated()))
    }

    /// Whether every registered queue is terminated.
    pub fn is_all_terminated(&self) -> bool {
        self.all_pools().iter().all(|p| p.is_terminated())
    }

    /// Wait up to `timeout` for one queue's workers to finish.
    pub async fn await_termination(
        &self,
        queue_id: &QueueId,
        timeout: Duration,
    ) -> Result<bool, ServiceError> {
        let pools = self.queue_pools(queue_id)?;
        Ok(Self::await_pools(pools, timeout).await)
    }

    /// Wait up to `timeout` for every queue's workers to finish.
    pub async fn await_termination_all(&self, timeout: Duration) -> bool {
        Self::await_pools(self.all_pools(), timeout).await
    }

    /// Cut the idle waits of one (queue, shard) pool short.
    ///
    /// Call right after a successful enqueue to minimize pick latency for
    /// user-facing queues.
    pub fn wakeup(
        &self,
        queue_id: &QueueId,
        shard_id: &QueueShardId,
    ) -> Result<(), ServiceError> {
        self.shard_pool(queue_id, shard_id)?.wakeup();
        Ok(())
    }

    /// Resize one (queue, shard) pool.
    pub fn resize(
        &self,
        queue_id: &QueueId,
        shard_id: &QueueShardId,
        count: usize,
    ) -> Result<(), ServiceError> {
        self.shard_pool(queue_id, shard_id)?.resize(count)?;
        Ok(())
    }

    /// Apply new configurations to already-registered queues.
    ///
    /// Every sub-setting updates through its dynamic holder, so observers
    /// run (and may veto) per group. Returns the textual diff per queue,
    /// omitting queues where nothing changed. Referencing an unregistered
    /// queue is a fatal caller error and nothing is applied.
    pub fn update_queue_configs(
        &self,
        configs: &[QueueConfig],
    ) -> Result<BTreeMap<QueueId, String>, ServiceError> {
        let registry = self.registry.read();

        let mut unknown: Vec<String> = configs
            .iter()
            .filter(|config| !registry.contains_key(config.queue_id()))
            .map(|config| config.queue_id().to_string())
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(ServiceError::UnknownQueues(unknown));
        }

        let mut diffs = BTreeMap::new();
        for config in configs {
            let registered = &registry[config.queue_id()];
            if let Some(diff) = registered.settings.apply(&config.settings) {
                info!(queue_id = %config.queue_id(), %diff, "queue config updated");
                diffs.insert(config.queue_id().clone(), diff);
            }
        }
        Ok(diffs)
    }

    /// Snapshot the live settings of one queue.
    pub fn queue_settings(
        &self,
        queue_id: &QueueId,
    ) -> Result<crate::settings::QueueSettings, ServiceError> {
        let registry = self.registry.read();
        let registered = registry
            .get(queue_id)
            .ok_or_else(|| ServiceError::UnknownQueue(queue_id.clone()))?;
        Ok(registered.settings.snapshot())
    }

    fn queue_pools(
        &self,
        queue_id: &QueueId,
    ) -> Result<Vec<Arc<QueueExecutionPool>>, ServiceError> {
        let registry = self.registry.read();
        let registered = registry
            .get(queue_id)
            .ok_or_else(|| ServiceError::UnknownQueue(queue_id.clone()))?;
        Ok(registered.pools.values().cloned().collect())
    }

    fn shard_pool(
        &self,
        queue_id: &QueueId,
        shard_id: &QueueShardId,
    ) -> Result<Arc<QueueExecutionPool>, ServiceError> {
        let registry = self.registry.read();
        let registered = registry
            .get(queue_id)
            .ok_or_else(|| ServiceError::UnknownQueue(queue_id.clone()))?;
        registered
            .pools
            .get(shard_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownShard {
                queue_id: queue_id.clone(),
                shard_id: shard_id.clone(),
            })
    }

    fn all_pools(&self) -> Vec<Arc<QueueExecutionPool>> {
        self.registry
            .read()
            .values()
            .flat_map(|registered| registered.pools.values().cloned())
            .collect()
    }

    async fn await_pools(pools: Vec<Arc<QueueExecutionPool>>, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut terminated = true;
        for pool in pools {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            terminated &= pool.await_termination(remaining).await;
        }
        terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::payload::{PayloadTransformer, StringPayloadTransformer};
    use crate::persistence::InMemoryTaskDao;
    use crate::settings::{
        ProcessingSettings, QueueSettings, QueueTableLocation,
    };
    use crate::task::{BoxError, Task, TaskExecutionResult};

    struct IdleConsumer {
        config: QueueConfig,
        transformer: StringPayloadTransformer,
    }

    impl IdleConsumer {
        fn new(queue_id: &str) -> Self {
            Self::with_settings(queue_id, QueueSettings::default())
        }

        fn with_settings(queue_id: &str, settings: QueueSettings) -> Self {
            let location =
                QueueTableLocation::new(QueueId::new(queue_id), "task_queue").unwrap();
            Self {
                config: QueueConfig::new(location, settings),
                transformer: StringPayloadTransformer,
            }
        }
    }

    #[async_trait]
    impl QueueConsumer for IdleConsumer {
        type Payload = String;

        fn queue_config(&self) -> &QueueConfig {
            &self.config
        }

        fn payload_transformer(&self) -> &dyn PayloadTransformer<String> {
            &self.transformer
        }

        async fn execute(&self, _task: Task<String>) -> Result<TaskExecutionResult, BoxError> {
            Ok(TaskExecutionResult::finish())
        }
    }

    fn service() -> QueueService {
        QueueService::new(vec![QueueShard::new(
            QueueShardId::new("main"),
            Arc::new(InMemoryTaskDao::new()),
        )])
    }

    #[tokio::test]
    async fn register_is_idempotent_per_queue_id() {
        let service = service();
        assert!(service.register(Arc::new(IdleConsumer::new("q1"))).unwrap());
        assert!(!service.register(Arc::new(IdleConsumer::new("q1"))).unwrap());
        assert_eq!(service.registered_queues(), vec![QueueId::new("q1")]);
    }

    #[tokio::test]
    async fn external_executor_requires_a_spawner() {
        let service = service();
        let settings = QueueSettings::default().with_processing(
            ProcessingSettings::default().with_mode(ProcessingMode::UseExternalExecutor),
        );
        let outcome = service.register(Arc::new(IdleConsumer::with_settings("q1", settings)));
        assert!(matches!(outcome, Err(ServiceError::MissingSpawner(_))));
    }

    #[tokio::test]
    async fn operations_on_unknown_queues_fail() {
        let service = service();
        let ghost = QueueId::new("ghost");
        assert!(matches!(
            service.start(&ghost),
            Err(ServiceError::UnknownQueue(_))
        ));
        assert!(matches!(
            service.wakeup(&ghost, &QueueShardId::new("main")),
            Err(ServiceError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn update_rejects_unknown_queues_with_sorted_names() {
        let service = service();
        service.register(Arc::new(IdleConsumer::new("known"))).unwrap();

        let zebra = IdleConsumer::new("zebra").config.clone();
        let alpha = IdleConsumer::new("alpha").config.clone();
        let outcome = service.update_queue_configs(&[zebra, alpha]);
        match outcome {
            Err(ServiceError::UnknownQueues(names)) => {
                assert_eq!(names, vec!["alpha".to_string(), "zebra".to_string()]);
            }
            other => panic!("expected UnknownQueues, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_returns_per_queue_diffs() {
        let service = service();
        service.register(Arc::new(IdleConsumer::new("q1"))).unwrap();

        let mut config = IdleConsumer::new("q1").config.clone();
        config.settings.processing = ProcessingSettings::default().with_count(4);
        let diffs = service.update_queue_configs(&[config.clone()]).unwrap();
        assert_eq!(diffs[&QueueId::new("q1")], "processing(count=4<-1)");

        // same config again: nothing changed, no diff entry
        let diffs = service.update_queue_configs(&[config]).unwrap();
        assert!(diffs.is_empty());
    }

    #[tokio::test]
    async fn thread_count_update_resizes_running_pools() {
        let service = service();
        service.register(Arc::new(IdleConsumer::new("q1"))).unwrap();
        let queue_id = QueueId::new("q1");
        service.start(&queue_id).unwrap();

        let mut config = IdleConsumer::new("q1").config.clone();
        config.settings.processing = ProcessingSettings::default().with_count(3);
        service.update_queue_configs(&[config]).unwrap();

        let settings = service.queue_settings(&queue_id).unwrap();
        assert_eq!(settings.processing.count, 3);

        service.shutdown(&queue_id).unwrap();
        assert!(service
            .await_termination(&queue_id, Duration::from_secs(5))
            .await
            .unwrap());
        assert!(service.is_terminated(&queue_id).unwrap());
    }

    #[tokio::test]
    async fn resize_after_shutdown_vetoes_the_update() {
        let service = service();
        service.register(Arc::new(IdleConsumer::new("q1"))).unwrap();
        let queue_id = QueueId::new("q1");
        service.start(&queue_id).unwrap();
        service.shutdown(&queue_id).unwrap();

        let mut config = IdleConsumer::new("q1").config.clone();
        config.settings.processing = ProcessingSettings::default().with_count(5);
        let diffs = service.update_queue_configs(&[config]).unwrap();
        // the pool vetoed the processing update, so no diff was produced
        assert!(diffs.is_empty());
        assert_eq!(
            service.queue_settings(&queue_id).unwrap().processing.count,
            1
        );
    }
}
