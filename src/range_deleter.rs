//! Asynchronous orphan cleanup.
//!
//! After a migration commits, the donor still physically holds the moved
//! documents. A durable [`RangeDeletionTask`] is created atomically with the
//! commit; the [`RangeDeleter`] worker later removes the orphans in fixed
//! size batches, keeping `num_orphan_docs` exact after every batch. Nothing
//! is deleted until the commit itself is majority-durable.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::catalog::{ChunkCatalog, ChunkRange};
use crate::config::ShardingConfig;
use crate::core::{Namespace, OpTime, Result, ShardError};
use crate::replication::ReplicationCoordinator;
use crate::storage::{MetadataStore, StorageEngine, decode, encode};

/// Durable record of one pending orphan-cleanup range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeDeletionTask {
    pub ns: Namespace,
    pub range: ChunkRange,
    /// Deletion may not start before this op time is majority-committed.
    pub when_ready: OpTime,
    /// True remaining orphan count; decremented and persisted per batch.
    pub num_orphan_docs: u64,
    pub scheduled_at: DateTime<Utc>,
}

impl RangeDeletionTask {
    pub fn new(ns: Namespace, range: ChunkRange, when_ready: OpTime, num_orphan_docs: u64) -> Self {
        Self {
            ns,
            range,
            when_ready,
            num_orphan_docs,
            scheduled_at: Utc::now(),
        }
    }

    /// Metadata-store key; one task per `{ns, range}`, so scheduling the
    /// same range twice dedupes.
    pub fn metadata_key(&self) -> String {
        format!("range_deletions/{}|{}", self.ns, self.range)
    }
}

/// Deletes orphaned ranges in bounded batches, FIFO by schedule time.
///
/// The metadata store is the source of truth for pending work: a restarted
/// node opens a fresh `RangeDeleter` over the same store and resumes from
/// the exact persisted counts.
pub struct RangeDeleter {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn StorageEngine>,
    catalog: Arc<ChunkCatalog>,
    replication: Arc<dyn ReplicationCoordinator>,
    config: ShardingConfig,
    suspended: AtomicBool,
    // Serializes batches so the storage delete and the counter persist of
    // one batch are never interleaved with another.
    batch_lock: Mutex<()>,
}

impl RangeDeleter {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageEngine>,
        catalog: Arc<ChunkCatalog>,
        replication: Arc<dyn ReplicationCoordinator>,
        config: ShardingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            storage,
            catalog,
            replication,
            config,
            suspended: AtomicBool::new(false),
            batch_lock: Mutex::new(()),
        })
    }

    /// Durably enqueues a task. Idempotent per `{ns, range}`.
    pub async fn schedule(&self, task: RangeDeletionTask) -> Result<()> {
        let key = task.metadata_key();
        if self.metadata.get(&key).await?.is_some() {
            debug!("range deletion for {} {} already scheduled", task.ns, task.range);
            return Ok(());
        }
        info!(
            "scheduling range deletion of {} orphans in {} {}",
            task.num_orphan_docs, task.ns, task.range
        );
        self.metadata.put(&key, encode(&task)?).await
    }

    /// All persisted tasks, FIFO by schedule time.
    pub async fn pending_tasks(&self) -> Result<Vec<RangeDeletionTask>> {
        let mut tasks = Vec::new();
        for key in self.metadata.list("range_deletions/").await? {
            if let Some(bytes) = self.metadata.get(&key).await? {
                tasks.push(decode::<RangeDeletionTask>(&bytes)?);
            }
        }
        tasks.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(tasks)
    }

    /// The oldest task whose `when_ready` is majority-committed.
    async fn next_ready(&self) -> Result<Option<RangeDeletionTask>> {
        let majority = self.replication.current_majority_commit_point();
        Ok(self
            .pending_tasks()
            .await?
            .into_iter()
            .find(|task| task.when_ready <= majority))
    }

    /// Temporarily stops the background worker from taking batches.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Deletes one batch from the oldest ready task and persists the
    /// decremented counter. Returns the task's remaining count, or None
    /// when no task is ready.
    pub async fn run_single_batch(&self) -> Result<Option<u64>> {
        let _serialize = self.batch_lock.lock().await;
        let Some(mut task) = self.next_ready().await? else {
            return Ok(None);
        };
        let key = task.metadata_key();
        let shard_key_field = self.catalog.shard_key_field(&task.ns).await?;

        let deleted = self
            .storage
            .batch_delete(
                &task.ns,
                &shard_key_field,
                &task.range,
                self.config.range_deleter_batch_size,
            )
            .await?;

        if deleted == 0 {
            if task.num_orphan_docs != 0 {
                warn!(
                    "range {} {} drained with counter at {}; completing",
                    task.ns, task.range, task.num_orphan_docs
                );
            }
            self.metadata.delete(&key).await?;
            return Ok(Some(0));
        }

        task.num_orphan_docs = task.num_orphan_docs.saturating_sub(deleted);
        if task.num_orphan_docs == 0 {
            info!("range deletion of {} {} complete", task.ns, task.range);
            self.metadata.delete(&key).await?;
        } else {
            self.metadata.put(&key, encode(&task)?).await?;
        }
        Ok(Some(task.num_orphan_docs))
    }

    /// Runs batches until no task is ready.
    pub async fn drain_ready(&self) -> Result<u64> {
        let mut batches = 0u64;
        while self.run_single_batch().await?.is_some() {
            batches += 1;
        }
        Ok(batches)
    }
}

/// Background worker driving a [`RangeDeleter`].
pub struct RangeDeleterWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl RangeDeleterWorker {
    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| ShardError::ExecutionError(format!("range deleter join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for RangeDeleterWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the single long-lived deletion worker for this node.
pub fn spawn_range_deleter_worker(deleter: Arc<RangeDeleter>) -> RangeDeleterWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let interval = deleter.config.range_deleter_interval;

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    if deleter.is_suspended() {
                        continue;
                    }
                    match deleter.run_single_batch().await {
                        Ok(_) => {}
                        Err(err) => {
                            warn!("range deleter batch failed: {}", err);
                        }
                    }
                }
            }
        }
    });

    RangeDeleterWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
