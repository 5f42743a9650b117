//! Durable metadata documents.
//!
//! Every piece of coordinator state that must survive a restart (chunk maps,
//! migration state documents, range-deletion tasks, the cluster version
//! document) goes through a [`MetadataStore`]. Writes are atomic per call,
//! including multi-document batches, so a crash never exposes a torn batch.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::{Result, ShardError};

/// Encode a metadata document for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| ShardError::MetadataIo(e.to_string()))
}

/// Decode a metadata document from storage.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| ShardError::MetadataIo(e.to_string()))
}

/// Key-value store for durable metadata documents.
///
/// `put_many` applies its whole batch atomically; a `None` value deletes the
/// key. Keys are namespaced by prefix, e.g. `migrations/<id>`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn put_many(&self, entries: Vec<(String, Option<Vec<u8>>)>) -> Result<()>;
}

/// In-memory metadata store.
///
/// Cloning shares the underlying map, so a test can hand the same store to a
/// "restarted" component and observe exactly what a process would recover.
#[derive(Clone, Default)]
pub struct InMemoryMetadataStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put_many(&self, batch: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for (key, value) in batch {
            match value {
                Some(bytes) => {
                    entries.insert(key, bytes);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// File-backed metadata store.
///
/// The whole document map is serialized with MessagePack and written through
/// a temp file followed by an atomic rename, so the on-disk image is always
/// a complete batch boundary.
pub struct FileMetadataStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileMetadataStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| ShardError::MetadataIo(e.to_string()))?;
            decode(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| ShardError::MetadataIo(e.to_string()))?;
        let bytes = encode(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ShardError::MetadataIo(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| ShardError::MetadataIo(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| ShardError::MetadataIo(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), bytes);
        self.flush(&entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        self.flush(&entries)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put_many(&self, batch: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for (key, value) in batch {
            match value {
                Some(bytes) => {
                    entries.insert(key, bytes);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        self.flush(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_store_shares_state_across_clones() {
        let store = InMemoryMetadataStore::new();
        store.put("a/1", vec![1, 2, 3]).await.unwrap();

        let restarted = store.clone();
        assert_eq!(restarted.get("a/1").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_put_many_applies_deletes_and_writes() {
        let store = InMemoryMetadataStore::new();
        store.put("a/1", vec![1]).await.unwrap();
        store
            .put_many(vec![
                ("a/1".to_string(), None),
                ("a/2".to_string(), Some(vec![2])),
            ])
            .await
            .unwrap();
        assert_eq!(store.get("a/1").await.unwrap(), None);
        assert_eq!(store.get("a/2").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = InMemoryMetadataStore::new();
        store.put("migrations/a", vec![]).await.unwrap();
        store.put("migrations/b", vec![]).await.unwrap();
        store.put("chunks/x", vec![]).await.unwrap();
        let keys = store.list("migrations/").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.bin");

        let store = FileMetadataStore::open(&path).unwrap();
        store.put("chunks/test", vec![9, 9]).await.unwrap();
        drop(store);

        let reopened = FileMetadataStore::open(&path).unwrap();
        assert_eq!(reopened.get("chunks/test").await.unwrap(), Some(vec![9, 9]));
    }
}
