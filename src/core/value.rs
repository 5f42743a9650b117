use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::{Result, ShardError};

/// A shard-key-comparable document scalar.
///
/// Ordering is total and type-bracketed so any two values compare:
/// Null < Boolean < Integer < Text. Within a bracket the natural ordering
/// applies. A document with no shard-key field is treated as Null, which
/// sorts below every concrete value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Text(_) => "TEXT",
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) => 2,
            Self::Text(_) => 3,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// A boundary in shard-key space.
///
/// MinKey sorts below every Value and MaxKey above, so the single chunk
/// created at collection-sharding time spans `[MinKey, MaxKey)` and covers
/// the entire key space including Null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KeyBound {
    MinKey,
    Value(Value),
    MaxKey,
}

impl KeyBound {
    pub fn value(v: impl Into<Value>) -> Self {
        KeyBound::Value(v.into())
    }
}

impl Ord for KeyBound {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyBound::MinKey, KeyBound::MinKey) => Ordering::Equal,
            (KeyBound::MinKey, _) => Ordering::Less,
            (_, KeyBound::MinKey) => Ordering::Greater,
            (KeyBound::MaxKey, KeyBound::MaxKey) => Ordering::Equal,
            (KeyBound::MaxKey, _) => Ordering::Greater,
            (_, KeyBound::MaxKey) => Ordering::Less,
            (KeyBound::Value(a), KeyBound::Value(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for KeyBound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for KeyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinKey => write!(f, "MinKey"),
            Self::MaxKey => write!(f, "MaxKey"),
            Self::Value(v) => write!(f, "{}", v),
        }
    }
}

impl From<Value> for KeyBound {
    fn from(v: Value) -> Self {
        KeyBound::Value(v)
    }
}

/// A flat document: named fields mapped to scalar values.
///
/// Documents are identified by their `_id` field. The shard key is an
/// ordinary field named by the collection descriptor; it may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Document {
    pub fields: BTreeMap<String, Value>,
}

pub const ID_FIELD: &str = "_id";

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// The document id. Every stored document must carry one.
    pub fn id(&self) -> Result<&Value> {
        self.fields.get(ID_FIELD).ok_or_else(|| {
            ShardError::ExecutionError("document is missing the '_id' field".to_string())
        })
    }

    /// The shard-key value, or None when the field is absent.
    pub fn shard_key(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ShardError::ExecutionError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ShardError::ExecutionError(e.to_string()))
    }
}
