//! External execution handoff
//!
//! The use-external-executor processing mode decouples claim throughput
//! from processing throughput by handing claimed tasks to a caller-supplied
//! spawner.

use futures::future::BoxFuture;

/// Caller-supplied executor for asynchronous task processing.
pub trait TaskSpawner: Send + Sync + 'static {
    /// Run the processing future to completion; must not block the caller.
    fn spawn(&self, work: BoxFuture<'static, ()>);
}

/// Spawner backed by the current Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskSpawner;

impl TaskSpawner for TokioTaskSpawner {
    fn spawn(&self, work: BoxFuture<'static, ()>) {
        tokio::spawn(work);
    }
}
