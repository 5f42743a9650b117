use async_trait::async_trait;

use crate::catalog::ChunkRange;
use crate::core::{Document, Namespace, OpTime, Result};
use crate::migration::state::{MigrationId, MigrationStateDocument};
use crate::migration::transfer_mods::TransferMod;

/// Donor-side operations the coordinator drives.
///
/// A pure request/response client: implementations hold no reference back to
/// the coordinator or the recipient, and all shared migration state lives in
/// the durable state document.
#[async_trait]
pub trait DonorShard: Send + Sync {
    /// Registers the outgoing migration (taking the exclusive range lock)
    /// and returns the snapshot timestamp the bulk clone will read at.
    async fn begin_migration(&self, state: &MigrationStateDocument) -> Result<OpTime>;

    /// Reads all documents in the range as of the clone timestamp.
    async fn snapshot_clone(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        at: OpTime,
    ) -> Result<Vec<Document>>;

    /// Removes and returns the currently captured transfer mods.
    async fn drain_transfer_mods(&self, id: MigrationId) -> Result<Vec<TransferMod>>;

    /// Count of captured-but-unconsumed transfer mods at this moment.
    async fn transfer_mods_pending(&self, id: MigrationId) -> Result<usize>;

    /// Live documents currently in the range on the donor.
    async fn count_in_range(&self, ns: &Namespace, range: &ChunkRange) -> Result<u64>;

    /// Blocks new writes to the migrating range for the commit handoff.
    async fn enter_critical_section(&self, id: MigrationId) -> Result<()>;

    /// Releases the write block. Must succeed after both commit and abort.
    async fn leave_critical_section(&self, id: MigrationId) -> Result<()>;

    /// Stops write capture and releases the range lock.
    async fn end_migration(&self, id: MigrationId) -> Result<()>;
}

/// Recipient-side operations the coordinator drives.
#[async_trait]
pub trait RecipientShard: Send + Sync {
    /// Stores a batch of cloned documents, returning the count applied.
    async fn apply_clone_batch(&self, ns: &Namespace, docs: Vec<Document>) -> Result<u64>;

    /// Replays one transfer mod.
    ///
    /// A mod whose shard key falls outside `range` is a logic error on the
    /// donor side and must fail with `ChunkRangeViolation`, never be applied
    /// or silently dropped.
    async fn apply_transfer_mod(
        &self,
        ns: &Namespace,
        range: &ChunkRange,
        transfer_mod: TransferMod,
    ) -> Result<()>;

    /// Removes every document in the range; abort-path cleanup of a partial
    /// clone. Returns the count removed.
    async fn discard_range(&self, ns: &Namespace, range: &ChunkRange) -> Result<u64>;
}
