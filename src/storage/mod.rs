//! Storage boundary for the sharding core.
//!
//! The core does not implement a storage engine; it drives one through the
//! [`StorageEngine`] trait. [`InMemoryStorageEngine`] is the reference
//! implementation used by tests and by the in-process cluster harness.

pub mod engine;
pub mod metadata;

pub use engine::{InMemoryStorageEngine, StorageEngine};
pub use metadata::{FileMetadataStore, InMemoryMetadataStore, MetadataStore, decode, encode};
