/// The chunk map of one sharded collection.
///
/// Chunks are keyed by their lower bound in an ordered persistent map, so a
/// lookup is a floor search and a snapshot handed to a router is a cheap
/// structural clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionChunkMap {
    pub ns: Namespace,
    pub epoch: Uuid,
    pub shard_key_field: String,
    pub chunks: OrdMap<KeyBound, ChunkEntry>,
    pub collection_version: ChunkVersion,
}

// Chunk-map behavior is split by concern to keep catalog logic maintainable.
include!("chunk_map/lookups.rs");
include!("chunk_map/mutations.rs");

impl CollectionChunkMap {
    /// Creates the map for a freshly sharded collection: a single chunk
    /// spanning the whole key space, owned by `initial_owner`.
    pub fn new(ns: Namespace, shard_key_field: String, initial_owner: ShardId) -> Self {
        let epoch = Uuid::new_v4();
        let version = ChunkVersion::initial(epoch);
        let entry = ChunkEntry {
            range: ChunkRange::full(),
            owning_shard: initial_owner,
            version: version.clone(),
        };
        let mut chunks = OrdMap::new();
        chunks.insert(KeyBound::MinKey, entry);
        Self {
            ns,
            epoch,
            shard_key_field,
            chunks,
            collection_version: version,
        }
    }

    /// Validates the partition invariant: chunks cover the whole key space
    /// contiguously, with no gaps or overlaps, and all versions share the
    /// collection epoch.
    pub fn validate(&self) -> Result<()> {
        let mut expected_min = KeyBound::MinKey;
        let mut seen = 0usize;
        for (key, entry) in self.chunks.iter() {
            if key != &entry.range.min {
                return Err(ShardError::RangeMapCorrupt(
                    self.ns.clone(),
                    format!("chunk keyed at {} but ranges from {}", key, entry.range.min),
                ));
            }
            if entry.range.min != expected_min {
                return Err(ShardError::RangeMapCorrupt(
                    self.ns.clone(),
                    format!(
                        "gap or overlap at {}: expected chunk starting at {}",
                        entry.range.min, expected_min
                    ),
                ));
            }
            if entry.range.min >= entry.range.max {
                return Err(ShardError::RangeMapCorrupt(
                    self.ns.clone(),
                    format!("inverted chunk range {}", entry.range),
                ));
            }
            if entry.version.epoch != self.epoch {
                return Err(ShardError::RangeMapCorrupt(
                    self.ns.clone(),
                    format!(
                        "chunk {} carries epoch {} outside collection epoch {}",
                        entry.range, entry.version.epoch, self.epoch
                    ),
                ));
            }
            expected_min = entry.range.max.clone();
            seen += 1;
        }
        if seen == 0 || expected_min != KeyBound::MaxKey {
            return Err(ShardError::RangeMapCorrupt(
                self.ns.clone(),
                format!("key space not fully covered, ends at {}", expected_min),
            ));
        }
        Ok(())
    }
}
