// Pipeline orchestrators - dev and prod release strategies
//
// Both follow the same linear state machine:
//
//   Init -> ContextLoaded -> CatalogLoaded -> SetSelected -> Built -> Deployed
//        -> (CleanedUp) -> Done
//
// with `Failed` reachable from any state. Dev records per-image failures and
// carries on; prod aborts the whole release on the first failure.

mod dev;
mod prod;
mod report;

pub use dev::DevOptions;
pub use prod::{release_version, ProdOptions};

use std::fmt;
use tracing::{error, info};

use crate::catalog::{self, Catalog};
use crate::context::{Environment, EnvironmentContext};
use crate::deploy::DeploymentTargets;
use crate::error::Result;
use crate::exec::Executor;
use crate::git::SourceControl;
use crate::lease::{default_lock_dir, ReleaseLease};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ContextLoaded,
    CatalogLoaded,
    SetSelected,
    Built,
    Deployed,
    CleanedUp,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::ContextLoaded => "context-loaded",
            Stage::CatalogLoaded => "catalog-loaded",
            Stage::SetSelected => "set-selected",
            Stage::Built => "built",
            Stage::Deployed => "deployed",
            Stage::CleanedUp => "cleaned-up",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Records the orchestrator's position in the state machine
#[derive(Debug)]
pub struct StageTracker {
    environment: Environment,
    current: Stage,
}

impl StageTracker {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            current: Stage::Init,
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, next: Stage) {
        info!(
            environment = %self.environment,
            "Stage {} -> {}", self.current, next
        );
        self.current = next;
    }

    pub fn fail(&mut self) {
        error!(
            environment = %self.environment,
            "Stage {} -> {}", self.current, Stage::Failed
        );
        self.current = Stage::Failed;
    }
}

/// Collaborators shared by both orchestrators
pub struct Pipeline<'a> {
    settings: &'a Settings,
    executor: &'a dyn Executor,
    source: &'a dyn SourceControl,
    targets: DeploymentTargets,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        executor: &'a dyn Executor,
        source: &'a dyn SourceControl,
        targets: DeploymentTargets,
    ) -> Self {
        Self {
            settings,
            executor,
            source,
            targets,
        }
    }

    fn discover(&self) -> Result<Catalog> {
        catalog::discover(&self.settings.pipeline_root, &self.settings.build_descriptor)
    }

    /// Take the per-environment lease; dry runs touch nothing and skip it
    fn lease(&self, context: &EnvironmentContext) -> Result<Option<ReleaseLease>> {
        if context.dry_run {
            return Ok(None);
        }
        let dir = self
            .settings
            .lock_dir
            .clone()
            .unwrap_or_else(default_lock_dir);
        let lease = ReleaseLease::acquire(&dir, context)?;
        info!("Holding release lease {}", lease.path().display());
        Ok(Some(lease))
    }

    fn jobs(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.settings.jobs).max(1)
    }
}
