impl CollectionChunkMap {
    /// Moves ownership of the chunk exactly matching `range` to `new_owner`.
    ///
    /// Compare-and-swap on the chunk version: `expected_version` must equal
    /// the chunk's current version (epoch included) or the call fails with
    /// `StaleVersion` and the caller must refresh and restart.
    pub fn apply_ownership_change(
        &mut self,
        range: &ChunkRange,
        new_owner: ShardId,
        expected_version: &ChunkVersion,
    ) -> Result<ChunkVersion> {
        let entry = self.entry_for_range(range).ok_or_else(|| {
            ShardError::StaleVersion(format!(
                "no chunk exactly matching {} in '{}'",
                range, self.ns
            ))
        })?;
        if &entry.version != expected_version {
            return Err(ShardError::StaleVersion(format!(
                "chunk {} in '{}' is at version {}, caller expected {}",
                range, self.ns, entry.version, expected_version
            )));
        }

        let next = self.collection_version.bump_major();
        self.chunks.insert(
            range.min.clone(),
            ChunkEntry {
                range: range.clone(),
                owning_shard: new_owner,
                version: next.clone(),
            },
        );
        self.collection_version = next.clone();
        Ok(next)
    }

    /// Subdivides the chunk exactly matching `range` at `split_points`.
    ///
    /// Points must strictly increase and fall strictly inside the range.
    /// Ownership is unchanged; each resulting chunk gets a fresh minor
    /// version under the current major.
    pub fn split(&mut self, range: &ChunkRange, split_points: Vec<Value>) -> Result<Vec<ChunkEntry>> {
        let entry = self
            .entry_for_range(range)
            .ok_or_else(|| {
                ShardError::StaleVersion(format!(
                    "no chunk exactly matching {} in '{}'",
                    range, self.ns
                ))
            })?
            .clone();

        if split_points.is_empty() {
            return Err(ShardError::InvalidSplitPoint(
                "at least one split point is required".to_string(),
            ));
        }
        let mut previous = range.min.clone();
        for point in &split_points {
            let bound = KeyBound::Value(point.clone());
            if bound <= previous || bound >= range.max {
                return Err(ShardError::InvalidSplitPoint(format!(
                    "split point {} does not strictly subdivide {}",
                    point, range
                )));
            }
            previous = bound;
        }

        let mut bounds = Vec::with_capacity(split_points.len() + 2);
        bounds.push(range.min.clone());
        bounds.extend(split_points.into_iter().map(KeyBound::Value));
        bounds.push(range.max.clone());

        self.chunks.remove(&range.min);
        let mut version = self.collection_version.clone();
        let mut created = Vec::with_capacity(bounds.len() - 1);
        for window in bounds.windows(2) {
            version = version.bump_minor();
            let piece = ChunkEntry {
                range: ChunkRange::new(window[0].clone(), window[1].clone())?,
                owning_shard: entry.owning_shard.clone(),
                version: version.clone(),
            };
            self.chunks.insert(window[0].clone(), piece.clone());
            created.push(piece);
        }
        self.collection_version = version;
        Ok(created)
    }

    /// Merges the contiguous run of chunks exactly covering `range` into one.
    ///
    /// All merged chunks must share an owner.
    pub fn merge(&mut self, range: &ChunkRange) -> Result<ChunkEntry> {
        let members: Vec<ChunkEntry> = self
            .chunks
            .values()
            .filter(|entry| range.covers(&entry.range))
            .cloned()
            .collect();
        if members.len() < 2 {
            return Err(ShardError::ExecutionError(format!(
                "merge of {} in '{}' needs at least two covered chunks",
                range, self.ns
            )));
        }
        if members.first().map(|e| &e.range.min) != Some(&range.min)
            || members.last().map(|e| &e.range.max) != Some(&range.max)
        {
            return Err(ShardError::ExecutionError(format!(
                "chunks covered by {} do not exactly tile it",
                range
            )));
        }
        let owner = members[0].owning_shard.clone();
        for pair in members.windows(2) {
            if pair[0].range.max != pair[1].range.min {
                return Err(ShardError::ExecutionError(format!(
                    "merge of {} spans non-contiguous chunks",
                    range
                )));
            }
            if pair[1].owning_shard != owner {
                return Err(ShardError::ExecutionError(format!(
                    "merge of {} spans chunks owned by {} and {}",
                    range, owner, pair[1].owning_shard
                )));
            }
        }

        for member in &members {
            self.chunks.remove(&member.range.min);
        }
        let next = self.collection_version.bump_minor();
        let merged = ChunkEntry {
            range: range.clone(),
            owning_shard: owner,
            version: next.clone(),
        };
        self.chunks.insert(range.min.clone(), merged.clone());
        self.collection_version = next;
        Ok(merged)
    }
}
