use serde::{Deserialize, Serialize};

use crate::core::{Document, Value};

/// The kind of write captured into a transfer-mods log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferModOp {
    Insert,
    Update,
    Delete,
}

/// One donor-side write that landed in a migrating range during clone.
///
/// The donor's normal write path appends these; the coordinator replays them
/// onto the recipient until the log drains to a fixed point. `shard_key` is
/// recorded at capture time so the recipient can verify range membership
/// without re-deriving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMod {
    pub op: TransferModOp,
    pub shard_key: Value,
    pub doc_id: Value,
    /// Full document for Insert and Update; None for Delete.
    pub doc: Option<Document>,
}

impl TransferMod {
    pub fn insert(shard_key: Value, doc_id: Value, doc: Document) -> Self {
        Self {
            op: TransferModOp::Insert,
            shard_key,
            doc_id,
            doc: Some(doc),
        }
    }

    pub fn update(shard_key: Value, doc_id: Value, doc: Document) -> Self {
        Self {
            op: TransferModOp::Update,
            shard_key,
            doc_id,
            doc: Some(doc),
        }
    }

    pub fn delete(shard_key: Value, doc_id: Value) -> Self {
        Self {
            op: TransferModOp::Delete,
            shard_key,
            doc_id,
            doc: None,
        }
    }
}
