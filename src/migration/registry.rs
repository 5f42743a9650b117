use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::catalog::ChunkRange;
use crate::core::{Namespace, Result, ShardError, Value};
use crate::migration::state::MigrationId;
use crate::migration::transfer_mods::TransferMod;

struct OutgoingMigration {
    ns: Namespace,
    range: ChunkRange,
    critical_section: bool,
    mods: VecDeque<TransferMod>,
}

/// Donor-side bookkeeping for outgoing migrations.
///
/// Enforces the at-most-one-migration-per-range rule (registration of an
/// overlapping range fails), captures range-member writes into the
/// transfer-mods log, and tracks the commit-time critical section that
/// blocks writes to the migrating range.
///
/// The registry is in-memory only: after a restart the coordinator
/// re-registers when it resumes, and a clone restarted from scratch needs no
/// stale log.
#[derive(Default)]
pub struct ActiveMigrationRegistry {
    inner: Mutex<HashMap<MigrationId, OutgoingMigration>>,
}

impl ActiveMigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an outgoing migration, taking the exclusive range lock.
    pub fn register(&self, id: MigrationId, ns: &Namespace, range: &ChunkRange) -> Result<()> {
        let mut inner = self.inner.lock()?;
        for active in inner.values() {
            if &active.ns == ns && active.range.overlaps(range) {
                return Err(ShardError::ConflictingOperationInProgress(format!(
                    "range {} overlaps an active migration of {} in '{}'",
                    range, active.range, ns
                )));
            }
        }
        inner.insert(
            id,
            OutgoingMigration {
                ns: ns.clone(),
                range: range.clone(),
                critical_section: false,
                mods: VecDeque::new(),
            },
        );
        Ok(())
    }

    /// Releases the range lock and discards any unconsumed mods.
    pub fn unregister(&self, id: MigrationId) -> Result<()> {
        self.inner.lock()?.remove(&id);
        Ok(())
    }

    pub fn is_registered(&self, id: MigrationId) -> Result<bool> {
        Ok(self.inner.lock()?.contains_key(&id))
    }

    /// Rejects a write to any range currently inside its commit critical
    /// section. Callers treat the error as transient and retry after the
    /// handoff completes.
    pub fn check_write_allowed(&self, ns: &Namespace, shard_key: &Value) -> Result<()> {
        let inner = self.inner.lock()?;
        for active in inner.values() {
            if &active.ns == ns && active.critical_section && active.range.contains(shard_key) {
                return Err(ShardError::ConflictingOperationInProgress(format!(
                    "write to {} blocked by migration critical section on {}",
                    shard_key, active.range
                )));
            }
        }
        Ok(())
    }

    /// Hook for the donor's write path: appends the mod to every active
    /// migration whose range contains the written key.
    pub fn note_write(&self, ns: &Namespace, transfer_mod: TransferMod) -> Result<()> {
        let mut inner = self.inner.lock()?;
        for active in inner.values_mut() {
            if &active.ns == ns && active.range.contains(&transfer_mod.shard_key) {
                active.mods.push_back(transfer_mod.clone());
            }
        }
        Ok(())
    }

    /// Removes and returns all currently captured mods for `id`.
    pub fn drain(&self, id: MigrationId) -> Result<Vec<TransferMod>> {
        let mut inner = self.inner.lock()?;
        let active = inner
            .get_mut(&id)
            .ok_or_else(|| ShardError::MigrationNotFound(id.to_string()))?;
        Ok(active.mods.drain(..).collect())
    }

    /// Count of captured-but-unconsumed mods at this moment.
    pub fn pending(&self, id: MigrationId) -> Result<usize> {
        let inner = self.inner.lock()?;
        let active = inner
            .get(&id)
            .ok_or_else(|| ShardError::MigrationNotFound(id.to_string()))?;
        Ok(active.mods.len())
    }

    pub fn enter_critical_section(&self, id: MigrationId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let active = inner
            .get_mut(&id)
            .ok_or_else(|| ShardError::MigrationNotFound(id.to_string()))?;
        active.critical_section = true;
        Ok(())
    }

    pub fn leave_critical_section(&self, id: MigrationId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if let Some(active) = inner.get_mut(&id) {
            active.critical_section = false;
        }
        Ok(())
    }
}
