use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event};

use crate::catalog::{ChunkCatalog, ChunkRange};
use crate::config::ShardingConfig;
use crate::core::{InterruptCheck, Namespace, Result, ShardError, ShardId, no_interrupt};
use crate::fcv::ClusterVersionCoordinator;
use crate::migration::proxies::{DonorShard, RecipientShard};
use crate::migration::state::{MigrationId, MigrationPhase, MigrationStateDocument};
use crate::range_deleter::RangeDeletionTask;
use crate::replication::ReplicationCoordinator;
use crate::storage::{MetadataStore, decode, encode};

/// Shared collaborators a migration needs.
#[derive(Clone)]
pub struct MigrationDeps {
    pub catalog: Arc<ChunkCatalog>,
    pub metadata: Arc<dyn MetadataStore>,
    pub replication: Arc<dyn ReplicationCoordinator>,
    pub fcv: Arc<ClusterVersionCoordinator>,
    pub config: ShardingConfig,
}

/// Orchestrates one chunk's ownership transfer from donor to recipient.
///
/// One coordinator instance runs one migration. The durable state document
/// is rewritten at every phase transition, so `recover_migrations` can pick
/// up any in-flight migration after a restart.
pub struct MigrationCoordinator {
    deps: MigrationDeps,
    donor: Arc<dyn DonorShard>,
    recipient: Arc<dyn RecipientShard>,
    state: MigrationStateDocument,
    interrupt: InterruptCheck,
}

impl std::fmt::Debug for MigrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MigrationCoordinator {
    /// Starts a new migration: verifies the FCV gate and current ownership,
    /// registers with the donor (taking the exclusive range lock), and
    /// persists the initial state document.
    pub async fn start(
        deps: MigrationDeps,
        donor: Arc<dyn DonorShard>,
        recipient: Arc<dyn RecipientShard>,
        ns: &Namespace,
        range: &ChunkRange,
        donor_id: ShardId,
        recipient_id: ShardId,
    ) -> Result<Self> {
        if donor_id == recipient_id {
            return Err(ShardError::ExecutionError(
                "donor and recipient must differ".to_string(),
            ));
        }
        if !deps.fcv.allows_chunk_migration().await? {
            return Err(ShardError::ConflictingOperationInProgress(
                "chunk migrations are blocked during a cluster version transition".to_string(),
            ));
        }

        let entry = deps.catalog.entry_for_range(ns, range).await?;
        if entry.owning_shard != donor_id {
            return Err(ShardError::StaleVersion(format!(
                "chunk {} in '{}' is owned by {}, not donor {}",
                range, ns, entry.owning_shard, donor_id
            )));
        }

        let mut state = MigrationStateDocument::new(
            ns.clone(),
            range.clone(),
            donor_id,
            recipient_id,
            entry.version,
        );
        state.clone_at = donor.begin_migration(&state).await?;

        let coordinator = Self {
            deps,
            donor,
            recipient,
            state,
            interrupt: no_interrupt(),
        };
        coordinator.persist_state().await?;
        event!(
            Level::INFO,
            migration = %coordinator.state.migration_id,
            ns = %coordinator.state.ns,
            range = %coordinator.state.range,
            "migration registered"
        );
        Ok(coordinator)
    }

    /// Replaces the interrupt hook; tests use this to pause or cancel
    /// between steps.
    pub fn with_interrupt(mut self, interrupt: InterruptCheck) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn state(&self) -> &MigrationStateDocument {
        &self.state
    }

    pub fn id(&self) -> MigrationId {
        self.state.migration_id
    }

    async fn persist_state(&self) -> Result<()> {
        self.deps
            .metadata
            .put(&self.state.metadata_key(), encode(&self.state)?)
            .await
    }

    /// Runs the migration to its terminal state.
    ///
    /// Any pre-commit failure aborts the migration and returns the original
    /// error. A failure after the commit batch leaves finalization to
    /// recovery; the ownership change itself is already durable.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.state.phase {
                MigrationPhase::Aborted => return Ok(()),
                MigrationPhase::Committed => {
                    // Ownership is already durable; a finalization failure
                    // is not abortable, recovery redoes it idempotently.
                    return self.finalize().await;
                }
                _ => {
                    if let Err(err) = self.step().await {
                        event!(
                            Level::WARN,
                            migration = %self.state.migration_id,
                            phase = %self.state.phase,
                            error = %err,
                            "migration failed, aborting"
                        );
                        if let Err(abort_err) = self.abort().await {
                            log::warn!(
                                "abort after migration failure also failed: {}",
                                abort_err
                            );
                        }
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Advances the migration by one phase. Exposed so tests and recovery
    /// can stop at exact phase boundaries.
    pub async fn step(&mut self) -> Result<MigrationPhase> {
        (self.interrupt)()?;
        match self.state.phase {
            MigrationPhase::NotStarted => {
                self.state.phase = MigrationPhase::Cloning;
                self.persist_state().await?;
            }
            MigrationPhase::Cloning => {
                self.run_clone().await?;
                self.state.phase = MigrationPhase::CloneCaughtUp;
                self.persist_state().await?;
            }
            MigrationPhase::CloneCaughtUp => {
                self.run_commit().await?;
            }
            MigrationPhase::Committed => {
                self.finalize().await?;
            }
            MigrationPhase::Aborted => {}
        }
        event!(
            Level::DEBUG,
            migration = %self.state.migration_id,
            phase = %self.state.phase,
            "migration phase advanced"
        );
        Ok(self.state.phase)
    }

    /// Bulk clone plus transfer-mods catch-up to a fixed point.
    async fn run_clone(&mut self) -> Result<()> {
        let docs = self
            .donor
            .snapshot_clone(&self.state.ns, &self.state.range, self.state.clone_at)
            .await?;
        for batch in docs.chunks(self.deps.config.clone_batch_size) {
            (self.interrupt)()?;
            let applied = self
                .recipient
                .apply_clone_batch(&self.state.ns, batch.to_vec())
                .await?;
            self.state.cloned_doc_count += applied;
            self.persist_state().await?;
        }

        // Fixed-point drain: donor writes never stop, so emptiness must be
        // re-observed after every drained batch, not assumed final.
        loop {
            (self.interrupt)()?;
            let mods = self.donor.drain_transfer_mods(self.id()).await?;
            if mods.is_empty() && self.donor.transfer_mods_pending(self.id()).await? == 0 {
                self.state.transfer_mods_remaining = 0;
                self.persist_state().await?;
                return Ok(());
            }
            for transfer_mod in mods {
                self.recipient
                    .apply_transfer_mod(&self.state.ns, &self.state.range, transfer_mod)
                    .await?;
            }
            self.state.transfer_mods_remaining =
                self.donor.transfer_mods_pending(self.id()).await? as u64;
            self.persist_state().await?;
        }
    }

    /// Ownership handoff under the critical section.
    ///
    /// The commit batch atomically rewrites the chunk map, flips this state
    /// document to Committed, and creates the donor's range-deletion task.
    async fn run_commit(&mut self) -> Result<()> {
        self.donor.enter_critical_section(self.id()).await?;
        let section_timeout = self.deps.config.critical_section_timeout;

        let commit_work = async {
            // Writes to the range are blocked now; one last drain settles
            // anything captured before the section closed.
            let mods = self.donor.drain_transfer_mods(self.id()).await?;
            for transfer_mod in mods {
                self.recipient
                    .apply_transfer_mod(&self.state.ns, &self.state.range, transfer_mod)
                    .await?;
            }

            let orphans = self
                .donor
                .count_in_range(&self.state.ns, &self.state.range)
                .await?;
            let commit_op = self.deps.replication.record_write();

            let mut committed = self.state.clone();
            committed.phase = MigrationPhase::Committed;
            committed.transfer_mods_remaining = 0;
            committed.commit_op_time = commit_op;

            let task = RangeDeletionTask::new(
                self.state.ns.clone(),
                self.state.range.clone(),
                commit_op,
                orphans,
            );
            let extra = vec![
                (committed.metadata_key(), Some(encode(&committed)?)),
                (task.metadata_key(), Some(encode(&task)?)),
            ];
            self.deps
                .catalog
                .commit_ownership_change(
                    &self.state.ns,
                    &self.state.range,
                    self.state.recipient.clone(),
                    &self.state.expected_version,
                    extra,
                )
                .await?;
            self.state = committed;
            Ok::<(), ShardError>(())
        };
        // The section holds writes back; it is bounded no matter what the
        // metadata layer does.
        let commit_result = match tokio::time::timeout(section_timeout, commit_work).await {
            Ok(result) => result,
            Err(_) => Err(ShardError::ExecutionError(format!(
                "migration commit exceeded the critical-section timeout of {:?}",
                section_timeout
            ))),
        };

        if let Err(err) = commit_result {
            // A stale version here means the range changed since clone
            // start; the whole migration restarts rather than retrying the
            // CAS in place.
            self.donor.leave_critical_section(self.id()).await?;
            return Err(err);
        }

        event!(
            Level::INFO,
            migration = %self.state.migration_id,
            range = %self.state.range,
            version = %self.state.expected_version,
            "ownership committed"
        );
        Ok(())
    }

    /// Post-commit cleanup: wait for majority durability, release the
    /// critical section, stop capture, and drop the state document.
    async fn finalize(&mut self) -> Result<()> {
        self.deps
            .replication
            .await_majority_commit(self.state.commit_op_time)
            .await?;
        self.donor.leave_critical_section(self.id()).await?;
        self.donor.end_migration(self.id()).await?;
        self.deps.metadata.delete(&self.state.metadata_key()).await?;
        event!(
            Level::INFO,
            migration = %self.state.migration_id,
            "migration finalized"
        );
        Ok(())
    }

    /// Aborts the migration: removes the recipient's partial copy, releases
    /// the critical section and range lock, and drops the state document.
    ///
    /// Safe to invoke at any pre-commit phase, repeatedly. The catalog is
    /// untouched, so ownership is never left split.
    pub async fn abort(&mut self) -> Result<()> {
        if self.state.phase == MigrationPhase::Committed {
            return Err(ShardError::ExecutionError(
                "cannot abort a committed migration".to_string(),
            ));
        }
        self.donor.leave_critical_section(self.id()).await?;
        self.recipient
            .discard_range(&self.state.ns, &self.state.range)
            .await?;
        self.donor.end_migration(self.id()).await?;
        self.state.phase = MigrationPhase::Aborted;
        self.deps.metadata.delete(&self.state.metadata_key()).await?;
        event!(
            Level::INFO,
            migration = %self.state.migration_id,
            "migration aborted"
        );
        Ok(())
    }
}

/// What recovery did with one persisted migration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Pre-commit migration restarted from the clone phase and run to its
    /// terminal state.
    Resumed(MigrationId),
    /// Commit was already durable; finalization was completed idempotently.
    Finalized(MigrationId),
    /// Document referred to a dead migration; donor/recipient residue was
    /// cleaned up.
    Cleaned(MigrationId),
}

/// Replays every persisted migration state document after a restart.
///
/// Pre-commit migrations whose chunk is still donor-owned restart from the
/// clone phase (the recipient's partial copy is discarded first). Documents
/// whose commit batch already landed are finalized idempotently. Anything
/// else is cleaned up.
pub async fn recover_migrations(
    deps: &MigrationDeps,
    proxies: &HashMap<ShardId, (Arc<dyn DonorShard>, Arc<dyn RecipientShard>)>,
) -> Result<Vec<RecoveryOutcome>> {
    let mut outcomes = Vec::new();
    for key in deps.metadata.list("migrations/").await? {
        let Some(bytes) = deps.metadata.get(&key).await? else {
            continue;
        };
        let state: MigrationStateDocument = decode(&bytes)?;
        let id = state.migration_id;

        let Some((donor, _)) = proxies.get(&state.donor) else {
            log::warn!("no proxy for donor {} of {}; leaving document", state.donor, id);
            continue;
        };
        let Some((_, recipient)) = proxies.get(&state.recipient) else {
            log::warn!(
                "no proxy for recipient {} of {}; leaving document",
                state.recipient,
                id
            );
            continue;
        };

        match state.phase {
            MigrationPhase::Committed => {
                deps.replication
                    .await_majority_commit(state.commit_op_time)
                    .await?;
                donor.leave_critical_section(id).await?;
                donor.end_migration(id).await?;
                deps.metadata.delete(&key).await?;
                outcomes.push(RecoveryOutcome::Finalized(id));
            }
            MigrationPhase::Aborted => {
                recipient.discard_range(&state.ns, &state.range).await?;
                donor.end_migration(id).await?;
                deps.metadata.delete(&key).await?;
                outcomes.push(RecoveryOutcome::Cleaned(id));
            }
            MigrationPhase::NotStarted | MigrationPhase::Cloning | MigrationPhase::CloneCaughtUp => {
                let entry = deps.catalog.entry_for_range(&state.ns, &state.range).await;
                let donor_still_owns = entry
                    .as_ref()
                    .map(|e| e.owning_shard == state.donor)
                    .unwrap_or(false);
                if donor_still_owns {
                    recipient.discard_range(&state.ns, &state.range).await?;
                    donor.end_migration(id).await?;

                    let mut resumed = state.clone();
                    resumed.phase = MigrationPhase::NotStarted;
                    resumed.cloned_doc_count = 0;
                    resumed.transfer_mods_remaining = 0;
                    resumed.expected_version = entry?.version;
                    resumed.clone_at = donor.begin_migration(&resumed).await?;

                    let mut coordinator = MigrationCoordinator {
                        deps: deps.clone(),
                        donor: donor.clone(),
                        recipient: recipient.clone(),
                        state: resumed,
                        interrupt: no_interrupt(),
                    };
                    coordinator.persist_state().await?;
                    coordinator.run().await?;
                    outcomes.push(RecoveryOutcome::Resumed(id));
                } else {
                    // Ownership moved away while the document still reads
                    // pre-commit; do not touch recipient data, just clear
                    // donor residue and the document.
                    donor.leave_critical_section(id).await?;
                    donor.end_migration(id).await?;
                    deps.metadata.delete(&key).await?;
                    outcomes.push(RecoveryOutcome::Cleaned(id));
                }
            }
        }
    }
    Ok(outcomes)
}
