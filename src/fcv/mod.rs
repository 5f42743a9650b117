//! Cluster-wide versioned configuration transitions.
//!
//! A single durable [`ClusterVersionDocument`] gates which features the
//! cluster may use. Transitions run a two-phase protocol: the transitional
//! phase (upgrading/downgrading) is persisted and majority-committed
//! immediately, long before the actual feature-cleanup work finishes, so
//! pollers (index builders, routers, the migration engine) observe it within
//! bounded time. Every node re-derives the same state by reading the same
//! document; there is no in-memory-only coordinator state.

pub mod coordinator;
pub mod gates;
pub mod version;

pub use coordinator::{ClusterVersionCoordinator, SetVersionOptions};
pub use gates::{FeatureGate, TransitionRequest};
pub use version::{ClusterVersionDocument, FcvPhase, FcvTag};
