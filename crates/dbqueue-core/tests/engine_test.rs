//! End-to-end engine tests over the in-memory backend
//!
//! Exercises the full path: producer enqueue, service-managed worker pools,
//! pick, consumer execution and result resolution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use dbqueue_core::payload::{PayloadTransformer, StringPayloadTransformer};
use dbqueue_core::persistence::{InMemoryTaskDao, TaskDao};
use dbqueue_core::producer::QueueProducer;
use dbqueue_core::service::QueueService;
use dbqueue_core::settings::{
    FailureRetryType, FailureSettings, PollSettings, ProcessingMode, ProcessingSettings,
    QueueConfig, QueueId, QueueSettings, QueueTableLocation, ReenqueueSettings,
};
use dbqueue_core::shard::{QueueShard, QueueShardId, SingleQueueShardRouter};
use dbqueue_core::spawner::TokioTaskSpawner;
use dbqueue_core::task::{BoxError, EnqueueParams, Task, TaskExecutionResult};
use dbqueue_core::QueueConsumer;

const SHARD: &str = "main";

fn location(queue_id: &str) -> QueueTableLocation {
    QueueTableLocation::new(QueueId::new(queue_id), "task_queue").unwrap()
}

fn fast_poll() -> PollSettings {
    PollSettings::default()
        .with_between_task_timeout(Duration::from_millis(5))
        .with_no_task_timeout(Duration::from_millis(20))
}

/// Consumer returning a fixed result for every task, counting executions.
struct ScriptedConsumer {
    config: QueueConfig,
    transformer: StringPayloadTransformer,
    executed: Arc<AtomicUsize>,
    result: TaskExecutionResult,
}

impl ScriptedConsumer {
    fn new(queue_id: &str, settings: QueueSettings, result: TaskExecutionResult) -> Self {
        Self {
            config: QueueConfig::new(location(queue_id), settings),
            transformer: StringPayloadTransformer,
            executed: Arc::new(AtomicUsize::new(0)),
            result,
        }
    }
}

#[async_trait]
impl QueueConsumer for ScriptedConsumer {
    type Payload = String;

    fn queue_config(&self) -> &QueueConfig {
        &self.config
    }

    fn payload_transformer(&self) -> &dyn PayloadTransformer<String> {
        &self.transformer
    }

    async fn execute(&self, _task: Task<String>) -> Result<TaskExecutionResult, BoxError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

fn single_shard_service(dao: &InMemoryTaskDao) -> QueueService {
    QueueService::new(vec![QueueShard::new(
        QueueShardId::new(SHARD),
        Arc::new(dao.clone()),
    )])
}

fn producer(dao: &InMemoryTaskDao, queue_id: &str) -> QueueProducer<String> {
    QueueProducer::new(
        location(queue_id),
        Arc::new(StringPayloadTransformer),
        Arc::new(SingleQueueShardRouter::new(QueueShardId::new(SHARD))),
        vec![QueueShard::new(
            QueueShardId::new(SHARD),
            Arc::new(dao.clone()),
        )],
    )
}

async fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let limit = Instant::now() + deadline;
    while Instant::now() < limit {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

#[tokio::test]
async fn finished_task_is_deleted_and_not_claimable_again() {
    let dao = InMemoryTaskDao::new();
    let service = single_shard_service(&dao);
    let queue_id = QueueId::new("finish");

    let consumer = Arc::new(ScriptedConsumer::new(
        "finish",
        QueueSettings::default().with_poll(fast_poll()),
        TaskExecutionResult::finish(),
    ));
    let executed = Arc::clone(&consumer.executed);
    service.register(consumer).unwrap();
    service.start(&queue_id).unwrap();

    producer(&dao, "finish").enqueue(&"p1".to_string()).await.unwrap();
    service.wakeup(&queue_id, &QueueShardId::new(SHARD)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || executed.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(Duration::from_secs(5), || dao.task_count() == 0).await);

    // nothing left to claim
    let second_pick = dao
        .pick_task(&location("finish"), &FailureSettings::default())
        .await
        .unwrap();
    assert!(second_pick.is_none());

    service.shutdown_all();
    assert!(service.await_termination_all(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn reenqueued_task_is_rescheduled_with_reset_counters() {
    let dao = InMemoryTaskDao::new();
    let service = single_shard_service(&dao);
    let queue_id = QueueId::new("again");

    let settings = QueueSettings::default()
        .with_poll(fast_poll())
        .with_reenqueue(ReenqueueSettings::fixed(Duration::from_secs(10)));
    let consumer = Arc::new(ScriptedConsumer::new(
        "again",
        settings,
        TaskExecutionResult::reenqueue(),
    ));
    let executed = Arc::clone(&consumer.executed);
    service.register(consumer).unwrap();
    service.start(&queue_id).unwrap();

    let enqueued = producer(&dao, "again").enqueue(&"p1".to_string()).await.unwrap();
    service.wakeup(&queue_id, &QueueShardId::new(SHARD)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || executed.load(Ordering::SeqCst) == 1).await);
    assert!(
        wait_until(Duration::from_secs(5), || {
            dao.find_record(enqueued.enqueue_id)
                .map(|record| record.reenqueue_attempt == 1)
                .unwrap_or(false)
        })
        .await
    );

    let record = dao.find_record(enqueued.enqueue_id).unwrap();
    // the reenqueue delay came from the fixed settings
    let delay = record.next_process_at - chrono::Utc::now();
    assert!(delay > chrono::Duration::seconds(8));
    assert!(delay <= chrono::Duration::seconds(10));
    // failure attempts reset, reenqueue attempts advanced
    assert_eq!(record.attempt, 0);
    assert_eq!(record.reenqueue_attempt, 1);
    assert_eq!(record.total_attempt, 1);

    service.shutdown_all();
    assert!(service.await_termination_all(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn every_processing_mode_completes_tasks() {
    for mode in [
        ProcessingMode::SeparateTransactions,
        ProcessingMode::WrapInTransaction,
        ProcessingMode::UseExternalExecutor,
    ] {
        let dao = InMemoryTaskDao::new();
        let service = single_shard_service(&dao).with_task_spawner(Arc::new(TokioTaskSpawner));
        let queue_name = format!("mode-{mode}");
        let queue_id = QueueId::new(queue_name.clone());

        let settings = QueueSettings::default()
            .with_poll(fast_poll())
            .with_processing(ProcessingSettings::new(2, mode));
        let consumer = Arc::new(ScriptedConsumer::new(
            &queue_name,
            settings,
            TaskExecutionResult::finish(),
        ));
        service.register(consumer).unwrap();
        service.start(&queue_id).unwrap();

        let producer = producer(&dao, &queue_name);
        for i in 0..5 {
            producer.enqueue(&format!("task-{i}")).await.unwrap();
        }
        service.wakeup(&queue_id, &QueueShardId::new(SHARD)).unwrap();

        assert!(
            wait_until(Duration::from_secs(10), || dao.task_count() == 0).await,
            "mode {mode} left tasks behind"
        );

        service.shutdown_all();
        assert!(service.await_termination_all(Duration::from_secs(5)).await);
    }
}

#[tokio::test]
async fn concurrent_pickers_claim_each_row_exactly_once() {
    let dao = InMemoryTaskDao::new();
    let loc = location("contended");
    // long linear backoff keeps claimed rows out of reach for the test
    let settings = FailureSettings::new(FailureRetryType::Linear, Duration::from_secs(3600));

    const ROWS: usize = 200;
    const WORKERS: usize = 8;
    for i in 0..ROWS {
        dao.enqueue(&loc, &EnqueueParams::new(format!("row-{i}")))
            .await
            .unwrap();
    }

    let mut claimers = Vec::new();
    for _ in 0..WORKERS {
        let dao = dao.clone();
        let loc = loc.clone();
        let settings = settings.clone();
        claimers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(record) = dao.pick_task(&loc, &settings).await.unwrap() {
                claimed.push(record.id);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all_ids = Vec::new();
    for claimer in claimers {
        all_ids.extend(claimer.await.unwrap());
    }

    assert_eq!(all_ids.len(), ROWS, "every row claimed exactly once in total");
    all_ids.sort_unstable();
    all_ids.dedup();
    assert_eq!(all_ids.len(), ROWS, "no row claimed twice");
}

#[tokio::test]
async fn paused_service_processes_nothing_until_unpaused() {
    let dao = InMemoryTaskDao::new();
    let service = single_shard_service(&dao);
    let queue_id = QueueId::new("paused");

    let consumer = Arc::new(ScriptedConsumer::new(
        "paused",
        QueueSettings::default().with_poll(fast_poll()),
        TaskExecutionResult::finish(),
    ));
    service.register(consumer).unwrap();
    service.pause_all();
    service.start_all();
    assert!(service.is_all_paused());

    producer(&dao, "paused").enqueue(&"p1".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dao.task_count(), 1);

    service.unpause(&queue_id).unwrap();
    assert!(wait_until(Duration::from_secs(5), || dao.task_count() == 0).await);

    service.shutdown_all();
    assert!(service.await_termination_all(Duration::from_secs(5)).await);
}
