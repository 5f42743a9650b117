//! Ownership filtering for reads.
//!
//! Orphaned documents stay physically present on a donor until the range
//! deleter gets to them. Every read path on a shard, including result sets
//! produced by external search indexes, passes through this filter so only
//! currently-owned documents reach the client.

use std::sync::Arc;

use crate::catalog::{ChunkCatalog, ChunkVersion};
use crate::core::{Document, Namespace, Result, ShardError, ShardId};

pub struct ShardVersionFilter {
    shard: ShardId,
    catalog: Arc<ChunkCatalog>,
}

impl ShardVersionFilter {
    pub fn new(shard: ShardId, catalog: Arc<ChunkCatalog>) -> Self {
        Self { shard, catalog }
    }

    /// True when this shard should return `doc` to a reader.
    ///
    /// A document without a shard-key value is always kept; it belongs to
    /// the null-valued chunk range by definition and is never an orphan.
    pub async fn keep(&self, ns: &Namespace, doc: &Document) -> Result<bool> {
        let shard_key_field = self.catalog.shard_key_field(ns).await?;
        let Some(key) = doc.shard_key(&shard_key_field) else {
            return Ok(true);
        };
        Ok(self.catalog.lookup(ns, key).await? == self.shard)
    }

    /// Filters an externally produced result set, e.g. documents returned
    /// by a search index that bypassed the normal query path.
    pub async fn filter_results(
        &self,
        ns: &Namespace,
        docs: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let shard_key_field = self.catalog.shard_key_field(ns).await?;
        let mut kept = Vec::with_capacity(docs.len());
        for doc in docs {
            let owned = match doc.shard_key(&shard_key_field) {
                None => true,
                Some(key) => self.catalog.lookup(ns, key).await? == self.shard,
            };
            if owned {
                kept.push(doc);
            }
        }
        Ok(kept)
    }

    /// Rejects a request routed with stale routing info.
    ///
    /// Correctness is enforced here, at the data shard; router caches are an
    /// optimization only. The caller treats `StaleConfig` as refresh-and-
    /// retry, never as a terminal failure.
    pub async fn check_shard_version(
        &self,
        ns: &Namespace,
        received: &ChunkVersion,
    ) -> Result<()> {
        let current = self.catalog.collection_version(ns).await?;
        if !received.same_epoch(&current) || received.major != current.major {
            return Err(ShardError::StaleConfig(
                ns.clone(),
                format!("received version {}, shard is at {}", received, current),
            ));
        }
        Ok(())
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }
}
