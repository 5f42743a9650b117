//! One shard's server-side surface.
//!
//! [`ShardNode`] binds a shard's storage engine, its ownership filter, and
//! the donor-side migration bookkeeping into one object. It implements the
//! donor and recipient proxy traits in-process, the same way an in-memory
//! forwarder simulates a cluster for tests: the coordinator only ever sees
//! the trait objects.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use crate::catalog::{ChunkCatalog, ChunkRange, ChunkVersion};
use crate::core::{Document, Namespace, OpTime, Result, ShardError, ShardId, Value};
use crate::filter::ShardVersionFilter;
use crate::migration::{
    ActiveMigrationRegistry, DonorShard, MigrationId, MigrationStateDocument, RecipientShard,
    TransferMod, TransferModOp,
};
use crate::replication::ReplicationCoordinator;
use crate::storage::StorageEngine;

pub struct ShardNode {
    shard_id: ShardId,
    storage: Arc<dyn StorageEngine>,
    catalog: Arc<ChunkCatalog>,
    replication: Arc<dyn ReplicationCoordinator>,
    registry: ActiveMigrationRegistry,
    filter: ShardVersionFilter,
}

impl ShardNode {
    pub fn new(
        shard_id: ShardId,
        storage: Arc<dyn StorageEngine>,
        catalog: Arc<ChunkCatalog>,
        replication: Arc<dyn ReplicationCoordinator>,
    ) -> Arc<Self> {
        let filter = ShardVersionFilter::new(shard_id.clone(), catalog.clone());
        Arc::new(Self {
            shard_id,
            storage,
            catalog,
            replication,
            registry: ActiveMigrationRegistry::new(),
            filter,
        })
    }

    pub fn id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn filter(&self) -> &ShardVersionFilter {
        &self.filter
    }

    async fn shard_key_of(&self, ns: &Namespace, doc: &Document) -> Result<Value> {
        let field = self.catalog.shard_key_field(ns).await?;
        Ok(doc.shard_key(&field).cloned().unwrap_or(Value::Null))
    }

    /// Inserts a document through the normal write path: the critical
    /// section check, the write itself, and transfer-mods capture for any
    /// active outgoing migration.
    pub async fn insert(&self, ns: &Namespace, doc: Document) -> Result<OpTime> {
        let key = self.shard_key_of(ns, &doc).await?;
        self.registry.check_write_allowed(ns, &key)?;
        let op = self.replication.record_write();
        self.storage.insert(ns, doc.clone(), op).await?;
        self.registry
            .note_write(ns, TransferMod::insert(key, doc.id()?.clone(), doc))?;
        Ok(op)
    }

    /// Replaces a document through the normal write path.
    pub async fn update(&self, ns: &Namespace, doc: Document) -> Result<OpTime> {
        let key = self.shard_key_of(ns, &doc).await?;
        self.registry.check_write_allowed(ns, &key)?;
        let op = self.replication.record_write();
        self.storage.update(ns, doc.clone(), op).await?;
        self.registry
            .note_write(ns, TransferMod::update(key, doc.id()?.clone(), doc))?;
        Ok(op)
    }

    /// Deletes by id through the normal write path.
    pub async fn delete(&self, ns: &Namespace, id: &Value) -> Result<bool> {
        let Some(existing) = self.storage.get(ns, id).await? else {
            return Ok(false);
        };
        let key = self.shard_key_of(ns, &existing).await?;
        self.registry.check_write_allowed(ns, &key)?;
        let op = self.replication.record_write();
        let deleted = self.storage.delete(ns, id, op).await?;
        if deleted {
            self.registry
                .note_write(ns, TransferMod::delete(key, id.clone()))?;
        }
        Ok(deleted)
    }

    /// All documents this shard should serve: physically present documents
    /// minus orphans, per the current routing table.
    pub async fn find(&self, ns: &Namespace) -> Result<Vec<Document>> {
        let docs = self.storage.scan(ns).await?;
        self.filter.filter_results(ns, docs).await
    }

    /// Every physically present document, orphans included. Diagnostic
    /// surface; user-facing reads go through `find`.
    pub async fn find_unfiltered(&self, ns: &Namespace) -> Result<Vec<Document>> {
        self.storage.scan(ns).await
    }

    /// A router-facing read: the routed shard version is verified before
    /// any data is returned, so stale routing surfaces as `StaleConfig`
    /// here rather than as wrong results.
    pub async fn query_with_version(
        &self,
        ns: &Namespace,
        received: &ChunkVersion,
    ) -> Result<Vec<Document>> {
        self.filter.check_shard_version(ns, received).await?;
        self.find(ns).await
    }
}

#[async_trait]
impl DonorShard for ShardNode {
    async fn begin_migration(&self, state: &MigrationStateDocument) -> Result<OpTime> {
        self.registry
            .register(state.migration_id, &state.ns, &state.range)?;
        debug!(
            "{}: capturing writes to {} {} for {}",
            self.shard_id, state.ns, state.range, state.migration_id
        );
        Ok(self.replication.current_op_time())
    }

    async fn snapshot_clone(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        at: OpTime,
    ) -> Result<Vec<Document>> {
        let field = self.catalog.shard_key_field(ns).await?;
        self.storage.snapshot_read(ns, &field, range, at).await
    }

    async fn drain_transfer_mods(&self, id: MigrationId) -> Result<Vec<TransferMod>> {
        self.registry.drain(id)
    }

    async fn transfer_mods_pending(&self, id: MigrationId) -> Result<usize> {
        self.registry.pending(id)
    }

    async fn count_in_range(&self, ns: &Namespace, range: &ChunkRange) -> Result<u64> {
        let field = self.catalog.shard_key_field(ns).await?;
        self.storage.count_in_range(ns, &field, range).await
    }

    async fn enter_critical_section(&self, id: MigrationId) -> Result<()> {
        self.registry.enter_critical_section(id)
    }

    async fn leave_critical_section(&self, id: MigrationId) -> Result<()> {
        self.registry.leave_critical_section(id)
    }

    async fn end_migration(&self, id: MigrationId) -> Result<()> {
        self.registry.unregister(id)
    }
}

#[async_trait]
impl RecipientShard for ShardNode {
    async fn apply_clone_batch(&self, ns: &Namespace, docs: Vec<Document>) -> Result<u64> {
        let mut applied = 0u64;
        for doc in docs {
            let op = self.replication.record_write();
            self.storage.insert(ns, doc, op).await?;
            applied += 1;
        }
        Ok(applied)
    }

    async fn apply_transfer_mod(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        transfer_mod: TransferMod,
    ) -> Result<()> {
        // Out-of-range operation defense: a mod for a key outside the
        // migrating range is a foreign-range mutation and must never be
        // applied. Loud failure, not a silent skip.
        if !range.contains(&transfer_mod.shard_key) {
            return Err(ShardError::ChunkRangeViolation(format!(
                "transfer mod for key {} is outside migrating range {}",
                transfer_mod.shard_key, range
            )));
        }

        let op = self.replication.record_write();
        match transfer_mod.op {
            TransferModOp::Insert | TransferModOp::Update => {
                let doc = transfer_mod.doc.ok_or_else(|| {
                    ShardError::ExecutionError(
                        "insert/update transfer mod without a document".to_string(),
                    )
                })?;
                // Replay is upsert-shaped so a mod that raced the snapshot
                // boundary applies cleanly in either order.
                if self.storage.get(ns, &transfer_mod.doc_id).await?.is_some() {
                    self.storage.update(ns, doc, op).await?;
                } else {
                    self.storage.insert(ns, doc, op).await?;
                }
            }
            TransferModOp::Delete => {
                self.storage.delete(ns, &transfer_mod.doc_id, op).await?;
            }
        }
        Ok(())
    }

    async fn discard_range(&self, ns: &Namespace, range: &ChunkRange) -> Result<u64> {
        let field = self.catalog.shard_key_field(ns).await?;
        let mut total = 0u64;
        loop {
            let removed = self.storage.batch_delete(ns, &field, range, 1024).await?;
            if removed == 0 {
                return Ok(total);
            }
            total += removed;
        }
    }
}
