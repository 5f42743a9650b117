use log::{info, warn};
use std::sync::Arc;

use crate::core::{InterruptCheck, Result, ShardError, no_interrupt};
use crate::fcv::gates::{FeatureGate, TransitionRequest};
use crate::fcv::version::{ClusterVersionDocument, FcvPhase, FcvTag};
use crate::replication::ReplicationCoordinator;
use crate::storage::{MetadataStore, decode, encode};

const CLUSTER_VERSION_KEY: &str = "cluster/version";

/// Options for a `set_version` request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetVersionOptions {
    /// Run every validation hook but persist nothing.
    pub dry_run: bool,
}

/// Drives the cluster through two-phase version transitions.
///
/// All state lives in the durable cluster version document; the coordinator
/// itself can be dropped and reopened on any node and will re-derive the
/// identical view.
pub struct ClusterVersionCoordinator {
    metadata: Arc<dyn MetadataStore>,
    replication: Arc<dyn ReplicationCoordinator>,
    gates: std::sync::Mutex<Vec<FeatureGate>>,
    interrupt: std::sync::Mutex<InterruptCheck>,
}

impl ClusterVersionCoordinator {
    /// Opens the coordinator, initializing the version document to
    /// `Stable(initial)` if none is persisted yet.
    pub async fn open(
        metadata: Arc<dyn MetadataStore>,
        replication: Arc<dyn ReplicationCoordinator>,
        initial: FcvTag,
    ) -> Result<Arc<Self>> {
        if metadata.get(CLUSTER_VERSION_KEY).await?.is_none() {
            let doc = ClusterVersionDocument::stable(initial);
            metadata.put(CLUSTER_VERSION_KEY, encode(&doc)?).await?;
        }
        Ok(Arc::new(Self {
            metadata,
            replication,
            gates: std::sync::Mutex::new(Vec::new()),
            interrupt: std::sync::Mutex::new(no_interrupt()),
        }))
    }

    /// Registers a feature's validation/cleanup hooks.
    pub fn register_gate(&self, gate: FeatureGate) -> Result<()> {
        self.gates.lock()?.push(gate);
        Ok(())
    }

    /// Replaces the interrupt hook checked between transition steps.
    pub fn set_interrupt(&self, interrupt: InterruptCheck) -> Result<()> {
        *self.interrupt.lock()? = interrupt;
        Ok(())
    }

    fn check_interrupt(&self) -> Result<()> {
        let interrupt = self.interrupt.lock()?.clone();
        interrupt()
    }

    /// The current durable version document, as any node would read it.
    pub async fn current(&self) -> Result<ClusterVersionDocument> {
        let bytes = self
            .metadata
            .get(CLUSTER_VERSION_KEY)
            .await?
            .ok_or_else(|| {
                ShardError::ExecutionError("cluster version document missing".to_string())
            })?;
        decode(&bytes)
    }

    /// Chunk migrations run only against a stable cluster version.
    pub async fn allows_chunk_migration(&self) -> Result<bool> {
        Ok(self.current().await?.phase == FcvPhase::Stable)
    }

    pub async fn effective_version(&self) -> Result<FcvTag> {
        Ok(self.current().await?.effective_version())
    }

    async fn persist(&self, doc: &ClusterVersionDocument) -> Result<()> {
        let op = self.replication.record_write();
        self.metadata.put(CLUSTER_VERSION_KEY, encode(doc)?).await?;
        self.replication.await_majority_commit(op).await
    }

    /// Requests a transition to `target`.
    ///
    /// The transitional phase document is persisted and majority-committed
    /// before any cleanup work runs, so the new phase is observable within
    /// bounded time regardless of how long the transition itself takes.
    pub async fn set_version(&self, target: FcvTag, opts: SetVersionOptions) -> Result<()> {
        let doc = self.current().await?;

        match doc.phase {
            FcvPhase::CleaningServerMetadata if target > doc.version => {
                // Point of no return: metadata cleanup must finish before
                // the cluster may move up again.
                return Err(ShardError::CannotUpgrade(format!(
                    "cluster is cleaning server metadata for downgrade to {}; \
                     the downgrade must complete first",
                    doc.target_version.unwrap_or(doc.version)
                )));
            }
            phase if phase.is_transitional() => {
                if doc.target_version == Some(target) {
                    if opts.dry_run {
                        return Ok(());
                    }
                    return self.drive_transition().await;
                }
                return Err(ShardError::ConflictingOperationInProgress(format!(
                    "transition to {} already in progress",
                    doc.target_version.unwrap_or(doc.version)
                )));
            }
            _ => {}
        }

        if target == doc.version {
            return Ok(());
        }

        let request = TransitionRequest {
            from: doc.version,
            to: target,
            dry_run: opts.dry_run,
        };
        self.validate(&request)?;
        if opts.dry_run {
            return Ok(());
        }

        let transitional = ClusterVersionDocument {
            // Effective version drops to the lower endpoint for the whole
            // transition, so gating is conservative in a mixed cluster.
            version: request.from.min(request.to),
            target_version: Some(target),
            phase: if request.is_upgrade() {
                FcvPhase::Upgrading
            } else {
                FcvPhase::Downgrading
            },
            updated_at: chrono::Utc::now(),
        };
        self.persist(&transitional).await?;
        info!(
            "cluster version transition {} -> {} entered phase {}",
            request.from, request.to, transitional.phase
        );

        self.drive_transition().await
    }

    /// Runs every registered validation hook for the request.
    fn validate(&self, request: &TransitionRequest) -> Result<()> {
        let gates = self.gates.lock()?.clone();
        for gate in &gates {
            gate.validate(request).map_err(|err| {
                warn!("feature gate '{}' vetoed transition: {}", gate.name(), err);
                err
            })?;
        }
        Ok(())
    }

    /// Completes whatever transition the durable document records.
    ///
    /// Safe to call on any node at any time: a stable document is a no-op,
    /// a transitional one is re-driven from its persisted phase. A failure
    /// mid-downgrade leaves the document transitional; the downgrade is not
    /// reversible once metadata cleanup starts.
    pub async fn resume(&self) -> Result<()> {
        let doc = self.current().await?;
        if doc.phase.is_transitional() {
            return self.drive_transition().await;
        }
        Ok(())
    }

    async fn drive_transition(&self) -> Result<()> {
        let doc = self.current().await?;
        let target = doc.target_version.ok_or_else(|| {
            ShardError::ExecutionError(format!(
                "transitional phase {} without a target version",
                doc.phase
            ))
        })?;

        match doc.phase {
            FcvPhase::Stable => Ok(()),
            FcvPhase::Upgrading => {
                self.check_interrupt()?;
                self.persist(&ClusterVersionDocument::stable(target)).await?;
                info!("cluster version upgrade to {} committed", target);
                Ok(())
            }
            FcvPhase::Downgrading => {
                self.check_interrupt()?;
                let cleaning = ClusterVersionDocument {
                    phase: FcvPhase::CleaningServerMetadata,
                    updated_at: chrono::Utc::now(),
                    ..doc
                };
                self.persist(&cleaning).await?;
                self.run_cleanup_and_commit(target).await
            }
            FcvPhase::CleaningServerMetadata => self.run_cleanup_and_commit(target).await,
        }
    }

    async fn run_cleanup_and_commit(&self, target: FcvTag) -> Result<()> {
        let gates = self.gates.lock()?.clone();
        for gate in &gates {
            self.check_interrupt()?;
            gate.run_downgrade_cleanup().await.map_err(|err| {
                warn!(
                    "downgrade cleanup for '{}' failed; cluster stays in {}",
                    gate.name(),
                    FcvPhase::CleaningServerMetadata
                );
                err
            })?;
        }
        self.check_interrupt()?;
        self.persist(&ClusterVersionDocument::stable(target)).await?;
        info!("cluster version downgrade to {} committed", target);
        Ok(())
    }
}
