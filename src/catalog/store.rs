fn chunk_map_key(ns: &Namespace) -> String {
    format!("chunks/{}", ns)
}

/// Durable chunk catalog: one [`CollectionChunkMap`] per sharded collection,
/// persisted through the metadata store on every mutation.
///
/// This is the single point of serialization for ownership changes; the
/// migration coordinator mutates it only via the version CAS.
pub struct ChunkCatalog {
    metadata: Arc<dyn MetadataStore>,
    collections: Mutex<HashMap<Namespace, CollectionChunkMap>>,
}

impl ChunkCatalog {
    /// Opens the catalog, recovering every persisted chunk map.
    pub async fn open(metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        let mut collections = HashMap::new();
        for key in metadata.list("chunks/").await? {
            if let Some(bytes) = metadata.get(&key).await? {
                let map: CollectionChunkMap = decode(&bytes)?;
                map.validate()?;
                collections.insert(map.ns.clone(), map);
            }
        }
        Ok(Self {
            metadata,
            collections: Mutex::new(collections),
        })
    }

    /// Shards a collection: creates the single full-space chunk at a fresh
    /// epoch, owned by `initial_owner`.
    pub async fn shard_collection(
        &self,
        ns: &Namespace,
        shard_key_field: &str,
        initial_owner: ShardId,
    ) -> Result<ChunkVersion> {
        let mut collections = self.collections.lock().await;
        if collections.contains_key(ns) {
            return Err(ShardError::ExecutionError(format!(
                "collection '{}' is already sharded",
                ns
            )));
        }
        let map = CollectionChunkMap::new(ns.clone(), shard_key_field.to_string(), initial_owner);
        let version = map.collection_version.clone();
        self.metadata.put(&chunk_map_key(ns), encode(&map)?).await?;
        collections.insert(ns.clone(), map);
        Ok(version)
    }

    /// Drops a sharded collection, invalidating its epoch.
    pub async fn drop_collection(&self, ns: &Namespace) -> Result<()> {
        let mut collections = self.collections.lock().await;
        collections.remove(ns);
        self.metadata.delete(&chunk_map_key(ns)).await
    }

    /// Routes `key` to its owning shard. O(log n) floor search.
    pub async fn lookup(&self, ns: &Namespace, key: &Value) -> Result<ShardId> {
        let collections = self.collections.lock().await;
        let map = collections
            .get(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        Ok(map.owner_of(key)?.owning_shard.clone())
    }

    /// The chunk entry owning `key`.
    pub async fn entry_for_key(&self, ns: &Namespace, key: &Value) -> Result<ChunkEntry> {
        let collections = self.collections.lock().await;
        let map = collections
            .get(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        Ok(map.owner_of(key)?.clone())
    }

    /// A structural clone of the collection's chunk map, cheap to hand to a
    /// router cache.
    pub async fn collection_snapshot(&self, ns: &Namespace) -> Result<CollectionChunkMap> {
        let collections = self.collections.lock().await;
        collections
            .get(ns)
            .cloned()
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))
    }

    pub async fn collection_version(&self, ns: &Namespace) -> Result<ChunkVersion> {
        Ok(self.collection_snapshot(ns).await?.collection_version)
    }

    pub async fn shard_key_field(&self, ns: &Namespace) -> Result<String> {
        Ok(self.collection_snapshot(ns).await?.shard_key_field)
    }

    /// The chunk exactly matching `range`, or `StaleVersion` when boundaries
    /// have moved since the caller last looked.
    pub async fn entry_for_range(&self, ns: &Namespace, range: &ChunkRange) -> Result<ChunkEntry> {
        let collections = self.collections.lock().await;
        let map = collections
            .get(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        map.entry_for_range(range).cloned().ok_or_else(|| {
            ShardError::StaleVersion(format!("no chunk exactly matching {} in '{}'", range, ns))
        })
    }

    /// Ownership CAS; see [`CollectionChunkMap::apply_ownership_change`].
    pub async fn apply_ownership_change(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        new_owner: ShardId,
        expected_version: &ChunkVersion,
    ) -> Result<ChunkVersion> {
        self.commit_ownership_change(ns, range, new_owner, expected_version, Vec::new())
            .await
    }

    /// Ownership CAS plus extra metadata documents written in the same
    /// atomic batch. The migration coordinator uses the batch to create the
    /// donor's range-deletion task together with the commit, so a crash
    /// never leaves a committed migration without its cleanup task.
    pub async fn commit_ownership_change(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        new_owner: ShardId,
        expected_version: &ChunkVersion,
        extra: Vec<(String, Option<Vec<u8>>)>,
    ) -> Result<ChunkVersion> {
        let mut collections = self.collections.lock().await;
        let map = collections
            .get_mut(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        let staged = {
            let mut staged = map.clone();
            staged.apply_ownership_change(range, new_owner, expected_version)?;
            staged
        };

        let mut batch = vec![(chunk_map_key(ns), Some(encode(&staged)?))];
        batch.extend(extra);
        self.metadata.put_many(batch).await?;

        let version = staged.collection_version.clone();
        *map = staged;
        Ok(version)
    }

    /// Splits a chunk; see [`CollectionChunkMap::split`].
    pub async fn split(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        split_points: Vec<Value>,
    ) -> Result<Vec<ChunkEntry>> {
        let mut collections = self.collections.lock().await;
        let map = collections
            .get_mut(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        let mut staged = map.clone();
        let created = staged.split(range, split_points)?;
        self.metadata.put(&chunk_map_key(ns), encode(&staged)?).await?;
        *map = staged;
        Ok(created)
    }

    /// Merges contiguous chunks; see [`CollectionChunkMap::merge`].
    pub async fn merge(&self, ns: &Namespace, range: &ChunkRange) -> Result<ChunkEntry> {
        let mut collections = self.collections.lock().await;
        let map = collections
            .get_mut(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        let mut staged = map.clone();
        let merged = staged.merge(range)?;
        self.metadata.put(&chunk_map_key(ns), encode(&staged)?).await?;
        *map = staged;
        Ok(merged)
    }

    /// Full partition-invariant check for one collection.
    pub async fn verify_partition(&self, ns: &Namespace) -> Result<()> {
        let collections = self.collections.lock().await;
        let map = collections
            .get(ns)
            .ok_or_else(|| ShardError::CollectionNotFound(ns.clone()))?;
        map.validate()
    }

    /// All sharded collections known to the catalog.
    pub async fn namespaces(&self) -> Vec<Namespace> {
        let collections = self.collections.lock().await;
        let mut out: Vec<Namespace> = collections.keys().cloned().collect();
        out.sort();
        out
    }
}
