//! Wait primitives for the worker loop
//!
//! Two kinds of wait exist and must stay distinct: the idle wait between
//! cycles can be cut short by a wakeup, while the crash wait guarantees a
//! floor on retry spacing after a systemic failure and therefore ignores
//! wakeups.

use std::time::Duration;

use tokio::sync::Notify;

/// How an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// A wakeup cut the wait short.
    Woken,
}

/// Idle wait between cycles, interruptible by [`Notify::notify_waiters`].
pub(crate) async fn idle_sleep(duration: Duration, wakeup: &Notify) -> WaitOutcome {
    tokio::select! {
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        _ = wakeup.notified() => WaitOutcome::Woken,
    }
}

/// Backoff wait after a crashed cycle.
///
/// Not interruptible by wakeup; only a hard cancellation of the worker task
/// ends it early.
pub(crate) async fn crash_sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
