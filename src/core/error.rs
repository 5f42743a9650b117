use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Stale chunk version: {0}")]
    StaleVersion(String),

    #[error("Stale routing config for '{0}': {1}")]
    StaleConfig(String, String),

    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Conflicting operation in progress: {0}")]
    ConflictingOperationInProgress(String),

    #[error("Chunk range violation: {0}")]
    ChunkRangeViolation(String),

    #[error("Range map corrupt for '{0}': {1}")]
    RangeMapCorrupt(String, String),

    #[error("Invalid split point: {0}")]
    InvalidSplitPoint(String),

    #[error("Cannot upgrade: {0}")]
    CannotUpgrade(String),

    #[error("Cannot downgrade: {0}")]
    CannotDowngrade(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Shard '{0}' not found")]
    ShardNotFound(String),

    #[error("Migration '{0}' not found")]
    MigrationNotFound(String),

    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Metadata I/O error: {0}")]
    MetadataIo(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, ShardError>;

impl ShardError {
    /// True for errors a caller should handle by refreshing its view of the
    /// cluster and retrying the whole operation from scratch.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StaleVersion(_)
                | Self::StaleConfig(_, _)
                | Self::SnapshotUnavailable(_)
                | Self::ConflictingOperationInProgress(_)
        )
    }

    /// True for errors that indicate a logic bug elsewhere in the system.
    /// These abort the current operation loudly and are never retried.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::ChunkRangeViolation(_) | Self::RangeMapCorrupt(_, _))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ShardError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
