use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::catalog::ChunkRange;
use crate::core::{Document, Namespace, OpTime, Result, ShardError, Value};

/// Document storage as seen by the sharding core.
///
/// Range arguments select documents whose shard-key value (the field named
/// by `shard_key_field`) falls inside the half-open range. Documents missing
/// the field are never selected by range operations.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Reads all documents in `range` as of `at`. The snapshot must not
    /// observe writes with a later op time.
    async fn snapshot_read(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
        at: OpTime,
    ) -> Result<Vec<Document>>;

    async fn insert(&self, ns: &Namespace, doc: Document, at: OpTime) -> Result<()>;

    async fn update(&self, ns: &Namespace, doc: Document, at: OpTime) -> Result<()>;

    async fn delete(&self, ns: &Namespace, id: &Value, at: OpTime) -> Result<bool>;

    /// The live document with `_id == id`, if any.
    async fn get(&self, ns: &Namespace, id: &Value) -> Result<Option<Document>>;

    /// Deletes up to `limit` documents in `range`, returning the count removed.
    async fn batch_delete(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
        limit: usize,
    ) -> Result<u64>;

    async fn count_in_range(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
    ) -> Result<u64>;

    /// Every live document in the collection, unfiltered.
    async fn scan(&self, ns: &Namespace) -> Result<Vec<Document>>;
}

#[derive(Clone)]
struct VersionedDoc {
    doc: Document,
    inserted_at: OpTime,
    deleted_at: Option<OpTime>,
}

#[derive(Default)]
struct CollectionData {
    // Version chains per document id, oldest first.
    docs: HashMap<Value, Vec<VersionedDoc>>,
}

impl CollectionData {
    fn live(&self) -> impl Iterator<Item = &Document> {
        self.docs
            .values()
            .filter_map(|versions| versions.last())
            .filter(|v| v.deleted_at.is_none())
            .map(|v| &v.doc)
    }

    fn visible_at(&self, at: OpTime) -> impl Iterator<Item = &Document> {
        self.docs.values().filter_map(move |versions| {
            versions
                .iter()
                .rev()
                .find(|v| v.inserted_at <= at)
                .filter(|v| v.deleted_at.map(|d| d > at).unwrap_or(true))
                .map(|v| &v.doc)
        })
    }
}

/// In-memory multi-versioned document store.
///
/// Keeps a short version chain per document id so `snapshot_read` can serve
/// a consistent view at a past op time while newer writes land.
#[derive(Clone, Default)]
pub struct InMemoryStorageEngine {
    collections: Arc<Mutex<HashMap<Namespace, CollectionData>>>,
}

impl InMemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_range(doc: &Document, shard_key_field: &str, range: &ChunkRange) -> bool {
    match doc.shard_key(shard_key_field) {
        Some(key) => range.contains(key),
        None => false,
    }
}

#[async_trait]
impl StorageEngine for InMemoryStorageEngine {
    async fn snapshot_read(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
        at: OpTime,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.lock().await;
        let Some(data) = collections.get(ns) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Document> = data
            .visible_at(at)
            .filter(|doc| in_range(doc, shard_key_field, range))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.fields.cmp(&b.fields));
        Ok(out)
    }

    async fn insert(&self, ns: &Namespace, doc: Document, at: OpTime) -> Result<()> {
        let id = doc.id()?.clone();
        let mut collections = self.collections.lock().await;
        let data = collections.entry(ns.clone()).or_default();
        let versions = data.docs.entry(id.clone()).or_default();
        if versions
            .last()
            .map(|v| v.deleted_at.is_none())
            .unwrap_or(false)
        {
            return Err(ShardError::DuplicateKey(format!(
                "document with _id {} already exists in '{}'",
                id, ns
            )));
        }
        versions.push(VersionedDoc {
            doc,
            inserted_at: at,
            deleted_at: None,
        });
        Ok(())
    }

    async fn update(&self, ns: &Namespace, doc: Document, at: OpTime) -> Result<()> {
        let id = doc.id()?.clone();
        let mut collections = self.collections.lock().await;
        let data = collections
            .get_mut(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        let versions = data
            .docs
            .get_mut(&id)
            .filter(|v| v.last().map(|d| d.deleted_at.is_none()).unwrap_or(false))
            .ok_or_else(|| {
                ShardError::ExecutionError(format!("no document with _id {} in '{}'", id, ns))
            })?;
        if let Some(current) = versions.last_mut() {
            current.deleted_at = Some(at);
        }
        versions.push(VersionedDoc {
            doc,
            inserted_at: at,
            deleted_at: None,
        });
        Ok(())
    }

    async fn delete(&self, ns: &Namespace, id: &Value, at: OpTime) -> Result<bool> {
        let mut collections = self.collections.lock().await;
        let Some(data) = collections.get_mut(ns) else {
            return Ok(false);
        };
        let Some(versions) = data.docs.get_mut(id) else {
            return Ok(false);
        };
        match versions.last_mut() {
            Some(current) if current.deleted_at.is_none() => {
                current.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, ns: &Namespace, id: &Value) -> Result<Option<Document>> {
        let collections = self.collections.lock().await;
        let Some(data) = collections.get(ns) else {
            return Ok(None);
        };
        Ok(data
            .docs
            .get(id)
            .and_then(|versions| versions.last())
            .filter(|v| v.deleted_at.is_none())
            .map(|v| v.doc.clone()))
    }

    async fn batch_delete(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
        limit: usize,
    ) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        let Some(data) = collections.get_mut(ns) else {
            return Ok(0);
        };
        let mut victims: Vec<Value> = data
            .live()
            .filter(|doc| in_range(doc, shard_key_field, range))
            .take(limit)
            .map(|doc| doc.id().cloned())
            .collect::<Result<_>>()?;
        victims.sort();
        let deleted = victims.len() as u64;
        for id in victims {
            // Physical removal: orphan cleanup does not keep old versions.
            data.docs.remove(&id);
        }
        Ok(deleted)
    }

    async fn count_in_range(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        range: &ChunkRange,
    ) -> Result<u64> {
        let collections = self.collections.lock().await;
        let Some(data) = collections.get(ns) else {
            return Ok(0);
        };
        Ok(data
            .live()
            .filter(|doc| in_range(doc, shard_key_field, range))
            .count() as u64)
    }

    async fn scan(&self, ns: &Namespace) -> Result<Vec<Document>> {
        let collections = self.collections.lock().await;
        let Some(data) = collections.get(ns) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Document> = data.live().cloned().collect();
        out.sort_by(|a, b| a.fields.cmp(&b.fields));
        Ok(out)
    }
}
