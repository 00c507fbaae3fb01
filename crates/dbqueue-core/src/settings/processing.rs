//! Worker-count and transaction-mode settings

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicValue};

/// Transactional strategy for one pick-execute-resolve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Pick in its own transaction, execute without one, resolve in a second
    /// independent transaction. At-least-once: consumer logic must be
    /// idempotent, since a crash between execution and resolution retries
    /// the task.
    SeparateTransactions,

    /// Pick, execute, and resolve inside one backend transaction.
    /// Exactly-once provided the consumer only touches that same backend;
    /// external I/O during execution holds the transaction open.
    WrapInTransaction,

    /// Pick in the worker loop, then hand the claimed task to a
    /// caller-supplied spawner for asynchronous execution and resolution.
    /// The loop advances immediately after handoff.
    UseExternalExecutor,
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeparateTransactions => write!(f, "separate-transactions"),
            Self::WrapInTransaction => write!(f, "wrap-in-transaction"),
            Self::UseExternalExecutor => write!(f, "use-external-executor"),
        }
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separate-transactions" => Ok(Self::SeparateTransactions),
            "wrap-in-transaction" => Ok(Self::WrapInTransaction),
            "use-external-executor" => Ok(Self::UseExternalExecutor),
            other => Err(format!("unknown processing mode `{other}`")),
        }
    }
}

/// Processing settings for one queue: worker count and processing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Number of concurrent workers per (queue, shard) pair. Zero is valid
    /// and keeps the queue registered but idle until resized up.
    pub count: usize,

    /// Transactional strategy.
    pub mode: ProcessingMode,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            count: 1,
            mode: ProcessingMode::SeparateTransactions,
        }
    }
}

impl ProcessingSettings {
    pub fn new(count: usize, mode: ProcessingMode) -> Self {
        Self { count, mode }
    }

    /// Set the worker count
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Set the processing mode
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }
}

impl DynamicValue for ProcessingSettings {
    fn group() -> &'static str {
        "processing"
    }

    fn diff(old: &Self, new: &Self) -> String {
        let mut parts = Vec::new();
        if old.count != new.count {
            diff_field(&mut parts, "count", &old.count, &new.count);
        }
        if old.mode != new.mode {
            diff_field(&mut parts, "mode", &old.mode, &new.mode);
        }
        format!("{}({})", Self::group(), parts.join(","))
    }
}
