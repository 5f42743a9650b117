//! Routing-table cache and scatter-gather reads.
//!
//! The router caches collection chunk maps and targets queries from the
//! cache without revalidating it first: the data shard verifies the routed
//! version and answers `StaleConfig` when the cache is behind. The router
//! treats that as refresh-and-retry, never as a terminal failure.

use futures::future::join_all;
use lru::LruCache;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::catalog::{ChunkCatalog, CollectionChunkMap};
use crate::core::{Document, Namespace, Result, ShardError, ShardId, Value};
use crate::node::ShardNode;

const ROUTING_CACHE_CAPACITY: usize = 64;

pub struct CachedRouter {
    catalog: Arc<ChunkCatalog>,
    nodes: HashMap<ShardId, Arc<ShardNode>>,
    cache: Mutex<LruCache<Namespace, CollectionChunkMap>>,
}

impl CachedRouter {
    pub fn new(catalog: Arc<ChunkCatalog>, nodes: HashMap<ShardId, Arc<ShardNode>>) -> Self {
        Self {
            catalog,
            nodes,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(ROUTING_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    /// The cached chunk map for `ns`, fetched from the catalog on miss.
    async fn routing_snapshot(&self, ns: &Namespace) -> Result<CollectionChunkMap> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.get(ns) {
            return Ok(snapshot.clone());
        }
        let snapshot = self.catalog.collection_snapshot(ns).await?;
        cache.put(ns.clone(), snapshot.clone());
        Ok(snapshot)
    }

    /// Drops the cached map and refetches from the catalog.
    pub async fn refresh(&self, ns: &Namespace) -> Result<CollectionChunkMap> {
        let snapshot = self.catalog.collection_snapshot(ns).await?;
        self.cache.lock().await.put(ns.clone(), snapshot.clone());
        Ok(snapshot)
    }

    /// Targets a key from the cached routing table.
    pub async fn route_key(&self, ns: &Namespace, key: &Value) -> Result<ShardId> {
        let snapshot = self.routing_snapshot(ns).await?;
        Ok(snapshot.owner_of(key)?.owning_shard.clone())
    }

    fn node_for(&self, shard: &ShardId) -> Result<Arc<ShardNode>> {
        self.nodes
            .get(shard)
            .cloned()
            .ok_or_else(|| ShardError::ShardNotFound(shard.to_string()))
    }

    async fn scatter(&self, ns: &Namespace, snapshot: &CollectionChunkMap) -> Result<Vec<Document>> {
        let shards: BTreeSet<ShardId> = snapshot
            .chunks
            .values()
            .map(|entry| entry.owning_shard.clone())
            .collect();

        let mut queries = Vec::with_capacity(shards.len());
        for shard in &shards {
            let node = self.node_for(shard)?;
            let version = snapshot.collection_version.clone();
            let ns = ns.clone();
            queries.push(async move { node.query_with_version(&ns, &version).await });
        }

        let mut docs = Vec::new();
        for result in join_all(queries).await {
            docs.extend(result?);
        }
        docs.sort_by(|a, b| a.fields.cmp(&b.fields));
        Ok(docs)
    }

    /// Reads the whole collection across all owning shards.
    ///
    /// On `StaleConfig` the routing table is refreshed and the read retried
    /// once; a second mismatch is surfaced to the caller.
    pub async fn find_all(&self, ns: &Namespace) -> Result<Vec<Document>> {
        let snapshot = self.routing_snapshot(ns).await?;
        match self.scatter(ns, &snapshot).await {
            Err(ShardError::StaleConfig(_, _)) => {
                let fresh = self.refresh(ns).await?;
                self.scatter(ns, &fresh).await
            }
            other => other,
        }
    }

    /// Reads the documents of one key from its owning shard.
    pub async fn find_by_key(&self, ns: &Namespace, key: &Value) -> Result<Vec<Document>> {
        let field = self.catalog.shard_key_field(ns).await?;
        let docs = self.find_all(ns).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.shard_key(&field) == Some(key))
            .collect())
    }
}
