//! Chunk migration engine.
//!
//! One [`MigrationCoordinator`] drives one chunk's ownership transfer from a
//! donor shard to a recipient shard: snapshot clone, transfer-mods catch-up,
//! then an atomic ownership handoff under a short critical section. All
//! shared state lives in the durable [`MigrationStateDocument`]; the donor
//! and recipient are reached only through request/response proxy traits, so
//! there are no in-memory links between shard objects.

pub mod coordinator;
pub mod proxies;
pub mod registry;
pub mod state;
pub mod transfer_mods;

pub use coordinator::{MigrationCoordinator, MigrationDeps, RecoveryOutcome, recover_migrations};
pub use proxies::{DonorShard, RecipientShard};
pub use registry::ActiveMigrationRegistry;
pub use state::{MigrationId, MigrationPhase, MigrationStateDocument};
pub use transfer_mods::{TransferMod, TransferModOp};
