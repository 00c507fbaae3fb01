//! Worker loop and execution pool

mod pool;
mod queue_loop;
mod wait;

pub use pool::{PoolError, QueueExecutionPool};
