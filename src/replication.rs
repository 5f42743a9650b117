//! Majority-commit boundary.
//!
//! The core never deletes the last copy of data on the strength of a local
//! write alone: migration finalization and orphan deletion wait until the
//! relevant op time is majority-committed. Replication itself (log shipping,
//! elections) is out of scope; this trait is the contract the core consumes.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

use crate::core::{OpTime, Result, ShardError};

#[async_trait]
pub trait ReplicationCoordinator: Send + Sync {
    /// Stamps a new write and returns its op time.
    fn record_write(&self) -> OpTime;

    /// The latest op time handed out by `record_write`.
    fn current_op_time(&self) -> OpTime;

    /// The newest op time known to be durable on a majority.
    fn current_majority_commit_point(&self) -> OpTime;

    /// Resolves once `op_time` is majority-committed.
    async fn await_majority_commit(&self, op_time: OpTime) -> Result<()>;
}

/// In-memory replication clock.
///
/// By default every write is majority-committed immediately. Tests call
/// [`InMemoryReplication::hold_majority`] to freeze the majority point and
/// exercise the code paths that wait on it.
pub struct InMemoryReplication {
    applied: AtomicU64,
    held: AtomicBool,
    majority_tx: watch::Sender<OpTime>,
    majority_rx: watch::Receiver<OpTime>,
}

impl Default for InMemoryReplication {
    fn default() -> Self {
        let (majority_tx, majority_rx) = watch::channel(OpTime::default());
        Self {
            applied: AtomicU64::new(0),
            held: AtomicBool::new(false),
            majority_tx,
            majority_rx,
        }
    }
}

impl InMemoryReplication {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn advance_majority(&self, op: OpTime) {
        // Concurrent writers may race; the majority point only moves forward.
        self.majority_tx.send_modify(|current| {
            if op > *current {
                *current = op;
            }
        });
    }

    /// Freezes the majority commit point at its current value.
    pub fn hold_majority(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Releases the freeze and advances the majority point to the newest
    /// applied op time.
    pub fn release_majority(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.advance_majority(self.current_op_time());
    }
}

#[async_trait]
impl ReplicationCoordinator for InMemoryReplication {
    fn record_write(&self) -> OpTime {
        let op = OpTime(self.applied.fetch_add(1, Ordering::SeqCst) + 1);
        if !self.held.load(Ordering::SeqCst) {
            self.advance_majority(op);
        }
        op
    }

    fn current_op_time(&self) -> OpTime {
        OpTime(self.applied.load(Ordering::SeqCst))
    }

    fn current_majority_commit_point(&self) -> OpTime {
        *self.majority_rx.borrow()
    }

    async fn await_majority_commit(&self, op_time: OpTime) -> Result<()> {
        let mut rx = self.majority_rx.clone();
        loop {
            if *rx.borrow() >= op_time {
                return Ok(());
            }
            rx.changed().await.map_err(|_| {
                ShardError::ExecutionError("replication clock shut down".to_string())
            })?;
        }
    }
}
