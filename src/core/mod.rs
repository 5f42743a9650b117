pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, ShardError};
pub use types::{InterruptCheck, Namespace, OpTime, ShardId, no_interrupt};
pub use value::{Document, ID_FIELD, KeyBound, Value};
