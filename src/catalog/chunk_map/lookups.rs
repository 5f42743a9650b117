impl CollectionChunkMap {
    /// Finds the chunk owning `key`: a floor search on the lower bound,
    /// verified against the chunk's upper bound. The verification should
    /// never fire while the partition invariant holds; it is a defense
    /// against a corrupt map.
    pub fn owner_of(&self, key: &Value) -> Result<&ChunkEntry> {
        let probe = KeyBound::Value(key.clone());
        let entry = self
            .chunks
            .get_prev(&probe)
            .map(|(_, entry)| entry)
            .ok_or_else(|| {
                ShardError::RangeMapCorrupt(
                    self.ns.clone(),
                    format!("no chunk at or below key {}", key),
                )
            })?;
        if !entry.range.contains(key) {
            return Err(ShardError::RangeMapCorrupt(
                self.ns.clone(),
                format!("chunk {} does not contain key {}", entry.range, key),
            ));
        }
        Ok(entry)
    }

    /// The chunk whose range exactly equals `range`, if any.
    pub fn entry_for_range(&self, range: &ChunkRange) -> Option<&ChunkEntry> {
        self.chunks.get(&range.min).filter(|entry| &entry.range == range)
    }

    /// All chunks owned by `shard`, in key order.
    pub fn chunks_owned_by(&self, shard: &ShardId) -> Vec<&ChunkEntry> {
        self.chunks
            .values()
            .filter(|entry| &entry.owning_shard == shard)
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
