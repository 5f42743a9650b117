/// Version of a chunk and, by extension, of its collection's routing table.
///
/// `epoch` changes only when the collection is dropped, recreated, or
/// resharded; versions from different epochs never compare. Within an epoch
/// the (major, minor) pair strictly increases on every ownership or boundary
/// change: ownership handoff bumps major, splits and merges bump minor under
/// the current major.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkVersion {
    pub epoch: Uuid,
    pub major: u64,
    pub minor: u64,
}

impl ChunkVersion {
    /// The first version of a freshly sharded collection.
    pub fn initial(epoch: Uuid) -> Self {
        Self {
            epoch,
            major: 1,
            minor: 0,
        }
    }

    pub fn bump_major(&self) -> Self {
        Self {
            epoch: self.epoch,
            major: self.major + 1,
            minor: 0,
        }
    }

    pub fn bump_minor(&self) -> Self {
        Self {
            epoch: self.epoch,
            major: self.major,
            minor: self.minor + 1,
        }
    }

    pub fn same_epoch(&self, other: &ChunkVersion) -> bool {
        self.epoch == other.epoch
    }

    /// Strict ordering within one epoch. Cross-epoch versions are never newer;
    /// callers must treat an epoch mismatch as a full refresh.
    pub fn newer_than(&self, other: &ChunkVersion) -> bool {
        self.same_epoch(other) && (self.major, self.minor) > (other.major, other.minor)
    }
}

impl fmt::Display for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}.{}", self.epoch, self.major, self.minor)
    }
}

/// A half-open interval `[min, max)` over shard-key space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub min: KeyBound,
    pub max: KeyBound,
}

impl ChunkRange {
    pub fn new(min: KeyBound, max: KeyBound) -> Result<Self> {
        if min >= max {
            return Err(ShardError::ExecutionError(format!(
                "chunk range min {} must be below max {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// The whole key space, as owned by the single chunk created at
    /// collection-sharding time.
    pub fn full() -> Self {
        Self {
            min: KeyBound::MinKey,
            max: KeyBound::MaxKey,
        }
    }

    pub fn contains(&self, key: &Value) -> bool {
        let key = KeyBound::Value(key.clone());
        self.min <= key && key < self.max
    }

    pub fn overlaps(&self, other: &ChunkRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// True when `other` lies entirely inside this range.
    pub fn covers(&self, other: &ChunkRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// One chunk: a range, its owner, and the version stamped by the last change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkEntry {
    pub range: ChunkRange,
    pub owning_shard: ShardId,
    pub version: ChunkVersion,
}
