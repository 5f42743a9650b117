use futures::future::BoxFuture;
use std::sync::Arc;

use crate::core::Result;
use crate::fcv::version::FcvTag;

/// The transition a gate is asked to validate.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub from: FcvTag,
    pub to: FcvTag,
    pub dry_run: bool,
}

impl TransitionRequest {
    pub fn is_upgrade(&self) -> bool {
        self.to > self.from
    }
}

type GateCheck = Arc<dyn Fn(&TransitionRequest) -> Result<()> + Send + Sync>;
type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One feature's hooks into the version transition.
///
/// Features register a check per direction rather than the coordinator
/// hardcoding feature knowledge: a veto from `check_upgrade` surfaces as
/// `CannotUpgrade`, from `check_downgrade` as `CannotDowngrade`. The
/// optional `downgrade_cleanup` runs during the isCleaningServerMetadata
/// sub-phase and may be long; transition visibility never waits on it.
#[derive(Clone)]
pub struct FeatureGate {
    name: String,
    check_upgrade: Option<GateCheck>,
    check_downgrade: Option<GateCheck>,
    downgrade_cleanup: Option<CleanupFn>,
}

impl FeatureGate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_upgrade: None,
            check_downgrade: None,
            downgrade_cleanup: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_upgrade(
        mut self,
        check: impl Fn(&TransitionRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.check_upgrade = Some(Arc::new(check));
        self
    }

    pub fn check_downgrade(
        mut self,
        check: impl Fn(&TransitionRequest) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.check_downgrade = Some(Arc::new(check));
        self
    }

    pub fn downgrade_cleanup(
        mut self,
        cleanup: impl Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    ) -> Self {
        self.downgrade_cleanup = Some(Arc::new(cleanup));
        self
    }

    /// Runs the direction-appropriate check, if registered.
    pub fn validate(&self, request: &TransitionRequest) -> Result<()> {
        let check = if request.is_upgrade() {
            &self.check_upgrade
        } else {
            &self.check_downgrade
        };
        match check {
            Some(check) => check(request),
            None => Ok(()),
        }
    }

    /// Runs the downgrade cleanup hook, if registered.
    pub async fn run_downgrade_cleanup(&self) -> Result<()> {
        match &self.downgrade_cleanup {
            Some(cleanup) => cleanup().await,
            None => Ok(()),
        }
    }
}
