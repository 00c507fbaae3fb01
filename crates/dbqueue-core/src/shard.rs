//! Queue shards and shard routing
//!
//! A shard is one backend connection/transaction scope. A queue may run
//! identically across several shards for horizontal fan-out; which shard a
//! new task lands on is decided by caller-supplied routing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::persistence::TaskDao;
use crate::task::EnqueueParams;

/// Identifier of one database shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueShardId(String);

impl QueueShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueShardId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One backend shard: its identifier plus the DAO bound to its connection
/// pool.
#[derive(Clone)]
pub struct QueueShard {
    shard_id: QueueShardId,
    dao: Arc<dyn TaskDao>,
}

impl QueueShard {
    pub fn new(shard_id: QueueShardId, dao: Arc<dyn TaskDao>) -> Self {
        Self { shard_id, dao }
    }

    pub fn shard_id(&self) -> &QueueShardId {
        &self.shard_id
    }

    pub fn dao(&self) -> &Arc<dyn TaskDao> {
        &self.dao
    }
}

impl std::fmt::Debug for QueueShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueShard")
            .field("shard_id", &self.shard_id)
            .finish_non_exhaustive()
    }
}

/// Chooses the shard a new task is enqueued on.
pub trait QueueShardRouter: Send + Sync {
    /// Shard id for the given enqueue request.
    fn resolve_shard_id(&self, params: &EnqueueParams) -> QueueShardId;
}

/// Router for the common single-shard deployment.
#[derive(Debug, Clone)]
pub struct SingleQueueShardRouter {
    shard_id: QueueShardId,
}

impl SingleQueueShardRouter {
    pub fn new(shard_id: QueueShardId) -> Self {
        Self { shard_id }
    }
}

impl QueueShardRouter for SingleQueueShardRouter {
    fn resolve_shard_id(&self, _params: &EnqueueParams) -> QueueShardId {
        self.shard_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_router_always_resolves_its_shard() {
        let router = SingleQueueShardRouter::new(QueueShardId::new("main"));
        let shard = router.resolve_shard_id(&EnqueueParams::new("p"));
        assert_eq!(shard, QueueShardId::new("main"));
    }
}
