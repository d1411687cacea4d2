// Executors - every side-effecting external call goes through here
//
// The orchestrators never spawn processes themselves. A real run uses
// `ShellExecutor` (container CLI + AWS SDK), a dry run uses `DryRunExecutor`,
// which logs and records the intended action instead of performing it.

mod aws;
pub(crate) mod command;
mod dry_run;
mod shell;
#[cfg(test)]
pub(crate) mod testing;

pub use dry_run::{DryRunExecutor, DRY_RUN_MARKER};
pub use shell::ShellExecutor;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::catalog::ImageName;
use crate::context::{EnvironmentContext, ImageRef};
use crate::error::CommandError;

/// Everything needed to build one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub image: ImageName,
    pub context_dir: PathBuf,
    pub reference: ImageRef,
    /// Passed verbatim as `--build-arg KEY=VALUE`, in key order
    pub build_args: BTreeMap<String, String>,
}

/// Identity reported by the credential chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// A side effect requested from an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RegistryLogin { registry: String },
    Build { reference: String, context_dir: PathBuf },
    Push { reference: String },
    UpdateFunction { function: String, reference: String },
    RemoveImage { reference: String },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::RegistryLogin { registry } => write!(f, "log in to {}", registry),
            Action::Build {
                reference,
                context_dir,
            } => write!(f, "build {} from {}", reference, context_dir.display()),
            Action::Push { reference } => write!(f, "push {}", reference),
            Action::UpdateFunction {
                function,
                reference,
            } => write!(f, "update function {} to {}", function, reference),
            Action::RemoveImage { reference } => write!(f, "remove local image {}", reference),
        }
    }
}

/// Capability interface for external tools
#[async_trait]
pub trait Executor: Send + Sync {
    /// Bind cloud clients to the resolved region and profile; called once per run
    async fn open_session(&self, _context: &EnvironmentContext) {}

    /// Authenticate the container CLI against the registry
    async fn registry_login(&self, registry: &str) -> Result<(), CommandError>;

    /// Resolve the identity behind the configured credentials
    async fn caller_identity(&self) -> Result<CallerIdentity, CommandError>;

    async fn build(&self, spec: &BuildSpec) -> Result<(), CommandError>;

    async fn push(&self, reference: &ImageRef) -> Result<(), CommandError>;

    /// Point `function` at `reference` and wait until the update is active
    async fn update_function(&self, function: &str, reference: &ImageRef)
        -> Result<(), CommandError>;

    /// List local `repository:tag` references for exactly `repository`
    async fn local_images(&self, repository: &str) -> Result<Vec<String>, CommandError>;

    async fn remove_image(&self, reference: &str) -> Result<(), CommandError>;
}
