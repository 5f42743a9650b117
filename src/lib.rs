// ============================================================================
// MemShard Library
// ============================================================================
//
// Sharding core for an in-memory document database: a versioned chunk
// catalog, a chunk migration engine with transactional ownership handoff,
// orphan-safe filtered reads, asynchronous range deletion, and a two-phase
// cluster version transition protocol.

pub mod catalog;
pub mod config;
pub mod core;
pub mod fcv;
pub mod filter;
pub mod migration;
pub mod node;
pub mod range_deleter;
pub mod replication;
pub mod router;
pub mod storage;
pub mod topology;

// Re-export main types for convenience
pub use crate::catalog::{ChunkCatalog, ChunkEntry, ChunkRange, ChunkVersion, CollectionChunkMap};
pub use crate::config::ShardingConfig;
pub use crate::core::{
    Document, ID_FIELD, KeyBound, Namespace, OpTime, Result, ShardError, ShardId, Value,
};
pub use crate::fcv::{
    ClusterVersionCoordinator, ClusterVersionDocument, FcvPhase, FcvTag, FeatureGate,
    SetVersionOptions,
};
pub use crate::filter::ShardVersionFilter;
pub use crate::migration::{
    ActiveMigrationRegistry, DonorShard, MigrationCoordinator, MigrationDeps, MigrationId,
    MigrationPhase, MigrationStateDocument, RecipientShard, RecoveryOutcome, TransferMod,
    TransferModOp, recover_migrations,
};
pub use crate::node::ShardNode;
pub use crate::range_deleter::{
    RangeDeleter, RangeDeletionTask, RangeDeleterWorker, spawn_range_deleter_worker,
};
pub use crate::replication::{InMemoryReplication, ReplicationCoordinator};
pub use crate::router::CachedRouter;
pub use crate::storage::{
    FileMetadataStore, InMemoryMetadataStore, InMemoryStorageEngine, MetadataStore, StorageEngine,
};
pub use crate::topology::{ShardEndpoint, ShardRegistry};
