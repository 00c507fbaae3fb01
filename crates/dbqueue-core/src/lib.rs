//! # dbqueue
//!
//! A database-backed task queue: producers insert typed work items into a
//! relational table, worker pools claim them one at a time under row-level
//! locking, run consumer logic and delete or reschedule the row per the
//! outcome. Queue semantics with the durability and transactional
//! guarantees of the relational store you already run.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       QueueService                           │
//! │  (registry of pools per queue and shard, config hot reload) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    QueueExecutionPool                        │
//! │  (worker fleet per queue/shard: start, pause, resize, stop) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           worker loop → pick → execute → resolve             │
//! │  (TaskPicker / consumer logic / TaskResultResolver via DAO) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The storage contract ([`persistence::TaskDao`]) is the only backend
//! seam: the claim operation locks one ready row against every other worker
//! in every process and pre-schedules its crash-retry time in the same
//! atomic step. Everything above it is backend-agnostic.
//!
//! ## Features
//!
//! - **Three processing modes**: separate transactions (at-least-once),
//!   one wrapping transaction (exactly-once against the same backend), or
//!   handoff to an external executor.
//! - **Retry arithmetic**: geometric, arithmetic and linear failure
//!   backoff; manual, fixed, sequential, arithmetic and geometric
//!   reenqueue delays.
//! - **Live reconfiguration**: thread counts and timeouts are dynamic
//!   settings with observer-vetoed, all-or-nothing updates and a file-watch
//!   reloader.
//! - **Sharding**: one queue may fan out over many database shards behind
//!   caller-supplied routing.

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod listener;
pub mod payload;
pub mod persistence;
pub mod producer;
pub mod runner;
pub mod service;
pub mod settings;
pub mod shard;
pub mod spawner;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, ConfigReloader, QueueConfigsReader};
    pub use crate::consumer::QueueConsumer;
    pub use crate::listener::{TaskLifecycleListener, ThreadLifecycleListener};
    pub use crate::payload::{JsonPayloadTransformer, PayloadTransformer, StringPayloadTransformer};
    pub use crate::persistence::{DaoError, InMemoryTaskDao, TaskDao, TaskTransaction};
    pub use crate::producer::{EnqueueOptions, EnqueueResult, QueueProducer};
    pub use crate::runner::QueueRunnerError;
    pub use crate::service::{QueueService, ServiceError};
    pub use crate::settings::{
        FailureRetryType, FailureSettings, PollSettings, ProcessingMode, ProcessingSettings,
        QueueConfig, QueueId, QueueSettings, QueueTableLocation, ReenqueueSettings,
    };
    pub use crate::shard::{QueueShard, QueueShardId, QueueShardRouter, SingleQueueShardRouter};
    pub use crate::spawner::{TaskSpawner, TokioTaskSpawner};
    pub use crate::task::{
        EnqueueParams, Task, TaskExecutionResult, TaskProcessingError, TaskRecord,
    };
}

// Re-export key types at crate root
pub use consumer::QueueConsumer;
pub use persistence::{DaoError, InMemoryTaskDao, TaskDao};
pub use producer::QueueProducer;
pub use service::{QueueService, ServiceError};
pub use settings::{QueueConfig, QueueId, QueueSettings, QueueTableLocation};
pub use shard::{QueueShard, QueueShardId};
pub use task::{Task, TaskExecutionResult, TaskRecord};
