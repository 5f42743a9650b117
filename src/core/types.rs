use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::Result;

/// Cooperative cancellation hook, checked between discrete coordinator
/// steps. Returning an error stops the operation at the next check point;
/// nothing is interrupted mid-step.
pub type InterruptCheck = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// An interrupt hook that never fires.
pub fn no_interrupt() -> InterruptCheck {
    Arc::new(|| Ok(()))
}

/// Unique identifier of a shard in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        ShardId(s.to_string())
    }
}

/// A namespace names one sharded collection, e.g. `"app.orders"`.
pub type Namespace = String;

/// A logical replication timestamp.
///
/// Monotonically increasing per cluster; produced by the replication layer
/// on every write and compared against the majority commit point to decide
/// when deferred work (orphan deletion, migration finalization) is safe.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct OpTime(pub u64);

impl OpTime {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> OpTime {
        OpTime(self.0 + 1)
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "optime_{}", self.0)
    }
}
