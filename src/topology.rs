//! Cluster topology store.
//!
//! Authoritative shard membership: shard id to endpoint. Per-collection
//! distribution (shard key, epoch, chunk ownership) lives in the
//! [`crate::catalog::ChunkCatalog`]; the registry is the leaf every other
//! component consults to resolve a shard id to a reachable peer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::{Result, ShardError, ShardId};
use crate::storage::{MetadataStore, decode, encode};

/// Network location of one shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardEndpoint {
    pub host: String,
    pub port: u16,
}

impl ShardEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryDocument {
    shards: HashMap<String, ShardEndpoint>,
}

const REGISTRY_KEY: &str = "topology/shards";

/// Durable shard membership store.
pub struct ShardRegistry {
    metadata: Arc<dyn MetadataStore>,
    shards: Mutex<HashMap<ShardId, ShardEndpoint>>,
}

impl ShardRegistry {
    /// Opens the registry, recovering persisted membership.
    pub async fn open(metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        let shards = match metadata.get(REGISTRY_KEY).await? {
            Some(bytes) => {
                let doc: RegistryDocument = decode(&bytes)?;
                doc.shards
                    .into_iter()
                    .map(|(id, ep)| (ShardId(id), ep))
                    .collect()
            }
            None => HashMap::new(),
        };
        Ok(Self {
            metadata,
            shards: Mutex::new(shards),
        })
    }

    async fn persist(&self, shards: &HashMap<ShardId, ShardEndpoint>) -> Result<()> {
        let doc = RegistryDocument {
            shards: shards
                .iter()
                .map(|(id, ep)| (id.0.clone(), ep.clone()))
                .collect(),
        };
        self.metadata.put(REGISTRY_KEY, encode(&doc)?).await
    }

    /// Adds a shard to the cluster.
    pub async fn add_shard(&self, id: ShardId, endpoint: ShardEndpoint) -> Result<()> {
        if id.as_str().trim().is_empty() {
            return Err(ShardError::ExecutionError(
                "shard id must not be empty".to_string(),
            ));
        }
        let mut shards = self.shards.lock().await;
        shards.insert(id, endpoint);
        self.persist(&shards).await
    }

    /// Removes a shard. Returns true if it was present.
    pub async fn remove_shard(&self, id: &ShardId) -> Result<bool> {
        let mut shards = self.shards.lock().await;
        let removed = shards.remove(id).is_some();
        if removed {
            self.persist(&shards).await?;
        }
        Ok(removed)
    }

    pub async fn contains(&self, id: &ShardId) -> bool {
        self.shards.lock().await.contains_key(id)
    }

    pub async fn endpoint_for(&self, id: &ShardId) -> Result<ShardEndpoint> {
        self.shards
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ShardError::ShardNotFound(id.to_string()))
    }

    /// Sorted list of all shard ids.
    pub async fn all_shards(&self) -> Vec<ShardId> {
        let mut out: Vec<ShardId> = self.shards.lock().await.keys().cloned().collect();
        out.sort();
        out
    }
}
