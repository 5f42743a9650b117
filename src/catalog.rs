//! Versioned chunk catalog.
//!
//! Authoritative mapping from shard-key ranges to owning shards, one map per
//! sharded collection. Every ownership or boundary change goes through a
//! compare-and-swap on the chunk version; there is no blind overwrite path.

use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::{KeyBound, Namespace, Result, ShardError, ShardId, Value};
use crate::storage::{MetadataStore, decode, encode};

// Catalog behavior is split by concern to keep the range-map logic maintainable.
include!("catalog/types.rs");
include!("catalog/chunk_map.rs");
include!("catalog/store.rs");
