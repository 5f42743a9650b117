use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A feature compatibility version, e.g. `7.0`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct FcvTag {
    pub major: u32,
    pub minor: u32,
}

impl FcvTag {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FcvTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cluster version transition phase
///
/// Phase transitions:
/// ```text
/// Stable(V) ──> Upgrading(V→V2) ──> Stable(V2)
/// Stable(V2) ──> Downgrading(V2→V) ──> CleaningServerMetadata ──> Stable(V)
/// ```
///
/// `CleaningServerMetadata` exists only on the downgrade path and is a point
/// of no return: the transition completes or stays transitional, it is never
/// rolled back to the previous stable version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FcvPhase {
    Stable,
    Upgrading,
    Downgrading,
    CleaningServerMetadata,
}

impl FcvPhase {
    pub fn is_transitional(&self) -> bool {
        !matches!(self, FcvPhase::Stable)
    }
}

impl fmt::Display for FcvPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stable => "stable",
            Self::Upgrading => "upgrading",
            Self::Downgrading => "downgrading",
            Self::CleaningServerMetadata => "isCleaningServerMetadata",
        };
        write!(f, "{}", name)
    }
}

/// The singleton durable cluster version document.
///
/// `version` is always the effective version: during a transition it is the
/// lower of the two endpoints, so feature gating is conservative while the
/// cluster is mixed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterVersionDocument {
    pub version: FcvTag,
    pub target_version: Option<FcvTag>,
    pub phase: FcvPhase,
    pub updated_at: DateTime<Utc>,
}

impl ClusterVersionDocument {
    pub fn stable(version: FcvTag) -> Self {
        Self {
            version,
            target_version: None,
            phase: FcvPhase::Stable,
            updated_at: Utc::now(),
        }
    }

    /// The version features must gate on right now.
    pub fn effective_version(&self) -> FcvTag {
        self.version
    }

    /// True when a feature requiring `min` may run.
    pub fn supports(&self, min: FcvTag) -> bool {
        self.effective_version() >= min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_ordering() {
        assert!(FcvTag::new(8, 0) > FcvTag::new(7, 3));
        assert!(FcvTag::new(7, 3) > FcvTag::new(7, 0));
    }

    #[test]
    fn test_effective_version_gates_conservatively() {
        let mut doc = ClusterVersionDocument::stable(FcvTag::new(7, 0));
        doc.target_version = Some(FcvTag::new(8, 0));
        doc.phase = FcvPhase::Upgrading;
        assert!(!doc.supports(FcvTag::new(8, 0)));
        assert!(doc.supports(FcvTag::new(7, 0)));
    }
}
