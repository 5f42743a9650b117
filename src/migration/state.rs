// ============================================================================
// Migration State Management
// ============================================================================
//
// Implements the State Pattern for the chunk migration lifecycle. A migration
// moves through defined phases and persists its state document at every
// transition, so a restarted process can resume or finalize it.
//
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::catalog::{ChunkRange, ChunkVersion};
use crate::core::{Namespace, OpTime, ShardId};

/// Unique identifier for a chunk migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationId(pub Uuid);

impl MigrationId {
    /// Generate a new unique migration ID
    pub fn new() -> Self {
        MigrationId(Uuid::new_v4())
    }
}

impl Default for MigrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "migration_{}", self.0)
    }
}

/// Migration phase following the State Pattern
///
/// Phase transitions:
/// ```text
/// NotStarted ──> Cloning ──> CloneCaughtUp ──> Committed
///     │             │              │
///     └─────────────┴──────────────┴──abort──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationPhase {
    /// Migration registered but cloning has not begun
    NotStarted,

    /// Recipient is bulk-copying the range snapshot; donor writes are
    /// captured into the transfer-mods log
    Cloning,

    /// Bulk clone finished and the transfer-mods log drained to a fixed point
    CloneCaughtUp,

    /// Ownership handed off; only finalization (cleanup of this document)
    /// remains
    Committed,

    /// Migration cancelled or failed before commit; no ownership change
    Aborted,
}

impl MigrationPhase {
    /// True once the migration can no longer change the catalog.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Committed | MigrationPhase::Aborted)
    }

    /// True while donor writes must be captured into the transfer-mods log.
    pub fn captures_writes(&self) -> bool {
        matches!(self, MigrationPhase::Cloning | MigrationPhase::CloneCaughtUp)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "kNotStarted",
            Self::Cloning => "kCloning",
            Self::CloneCaughtUp => "kCloneCaughtUp",
            Self::Committed => "kCommitted",
            Self::Aborted => "kAborted",
        };
        write!(f, "{}", name)
    }
}

/// Durable record of one in-flight migration.
///
/// Created when the migration starts, rewritten at every phase transition,
/// and deleted once the migration is finalized (committed and cleaned up, or
/// aborted and cleaned up).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStateDocument {
    pub migration_id: MigrationId,
    pub ns: Namespace,
    pub range: ChunkRange,
    pub donor: ShardId,
    pub recipient: ShardId,
    pub phase: MigrationPhase,
    pub cloned_doc_count: u64,
    pub transfer_mods_remaining: u64,
    /// Snapshot timestamp the bulk clone reads at.
    pub clone_at: OpTime,
    /// Chunk version captured at start; the commit CAS expects exactly this.
    pub expected_version: ChunkVersion,
    /// Op time of the commit write; finalization waits for its majority.
    pub commit_op_time: OpTime,
    pub started_at: DateTime<Utc>,
}

impl MigrationStateDocument {
    pub fn new(
        ns: Namespace,
        range: ChunkRange,
        donor: ShardId,
        recipient: ShardId,
        expected_version: ChunkVersion,
    ) -> Self {
        Self {
            migration_id: MigrationId::new(),
            ns,
            range,
            donor,
            recipient,
            phase: MigrationPhase::NotStarted,
            cloned_doc_count: 0,
            transfer_mods_remaining: 0,
            clone_at: OpTime::default(),
            expected_version,
            commit_op_time: OpTime::default(),
            started_at: Utc::now(),
        }
    }

    /// Metadata-store key for this migration's state document.
    pub fn metadata_key(&self) -> String {
        Self::key_for(self.migration_id)
    }

    pub fn key_for(id: MigrationId) -> String {
        format!("migrations/{}", id.0)
    }
}
