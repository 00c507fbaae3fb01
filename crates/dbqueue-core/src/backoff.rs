//! Backoff arithmetic
//!
//! Pure delay calculations shared by every backend: the pick operation uses
//! [`failure_delay`] to pre-schedule the crash-retry time while claiming a
//! row, and the result resolver uses [`reenqueue_delay`] when a consumer
//! reenqueues without an explicit delay.

use std::time::Duration;

use crate::settings::{FailureRetryType, FailureSettings, ReenqueueSettings};

/// Reenqueue delay computation errors.
#[derive(Debug, thiserror::Error)]
pub enum ReenqueueDelayError {
    /// Manual strategy requires the consumer to pass an explicit delay.
    #[error("reenqueue strategy is manual but no explicit delay was supplied")]
    ExplicitDelayRequired,

    /// An empty plan cannot produce a delay.
    #[error("sequential reenqueue plan is empty")]
    EmptyPlan,
}

/// Delay before the next attempt after a failure.
///
/// `attempt` is the claim-time attempt count before increment (0-based):
/// the first execution of a task computes its crash-retry schedule with
/// `attempt = 0`.
pub fn failure_delay(settings: &FailureSettings, attempt: u32) -> Duration {
    let base = settings.retry_interval;
    match settings.retry_type {
        FailureRetryType::Geometric => scale(base, 2f64.powi(attempt.min(i32::MAX as u32) as i32)),
        FailureRetryType::Arithmetic => scale(base, (1 + 2 * u64::from(attempt)) as f64),
        FailureRetryType::Linear => base,
    }
}

/// Delay before the next attempt after an explicit reenqueue.
///
/// `reenqueue_attempt` is the row's reenqueue-attempt count at claim time
/// (0-based), consumed for the computation before the resolver increments
/// it.
pub fn reenqueue_delay(
    settings: &ReenqueueSettings,
    reenqueue_attempt: u32,
) -> Result<Duration, ReenqueueDelayError> {
    match settings {
        ReenqueueSettings::Manual => Err(ReenqueueDelayError::ExplicitDelayRequired),
        ReenqueueSettings::Fixed { delay } => Ok(*delay),
        ReenqueueSettings::Sequential { plan } => {
            let last = plan.len().checked_sub(1).ok_or(ReenqueueDelayError::EmptyPlan)?;
            Ok(plan[(reenqueue_attempt as usize).min(last)])
        }
        ReenqueueSettings::Arithmetic {
            initial_delay,
            step,
        } => Ok(initial_delay
            .checked_add(scale(*step, f64::from(reenqueue_attempt)))
            .unwrap_or(Duration::MAX)),
        ReenqueueSettings::Geometric {
            initial_delay,
            ratio,
        } => Ok(scale(
            *initial_delay,
            f64::from(*ratio).powi(reenqueue_attempt.min(i32::MAX as u32) as i32),
        )),
    }
}

fn scale(base: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
