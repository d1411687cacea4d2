// Deployer: activate pushed image references on their compute functions

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::ImageName;
use crate::context::{Environment, EnvironmentContext, ImageRef};
use crate::error::{ReleaseError, Result};
use crate::exec::Executor;
use crate::settings::FunctionSettings;

type NamingFn = dyn Fn(&ImageName, Environment) -> String + Send + Sync;

/// Mapping from (image, environment) to the name of the function running it.
///
/// Kept as a single injectable function so per-environment naming rules stay
/// out of the orchestrators.
#[derive(Clone)]
pub struct DeploymentTargets {
    resolve: Arc<NamingFn>,
}

impl DeploymentTargets {
    pub fn from_fn<F>(resolve: F) -> Self
    where
        F: Fn(&ImageName, Environment) -> String + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
        }
    }

    /// Templates with `{image}` and optional `{environment}` placeholders
    pub fn from_templates(dev: impl Into<String>, prod: impl Into<String>) -> Self {
        let dev = dev.into();
        let prod = prod.into();
        Self::from_fn(move |image, environment| {
            let template = match environment {
                Environment::Dev => &dev,
                Environment::Prod => &prod,
            };
            template
                .replace("{image}", image.as_str())
                .replace("{environment}", environment.as_str())
        })
    }

    pub fn from_settings(functions: &FunctionSettings) -> Self {
        Self::from_templates(functions.dev.clone(), functions.prod.clone())
    }

    pub fn resolve(&self, image: &ImageName, environment: Environment) -> String {
        (self.resolve)(image, environment)
    }
}

impl fmt::Debug for DeploymentTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentTargets").finish_non_exhaustive()
    }
}

pub struct Deployer<'a> {
    context: &'a EnvironmentContext,
    executor: &'a dyn Executor,
    targets: &'a DeploymentTargets,
}

impl<'a> Deployer<'a> {
    pub fn new(
        context: &'a EnvironmentContext,
        executor: &'a dyn Executor,
        targets: &'a DeploymentTargets,
    ) -> Self {
        Self {
            context,
            executor,
            targets,
        }
    }

    pub fn target(&self, image: &ImageName) -> String {
        self.targets.resolve(image, self.context.environment)
    }

    /// Check that the credentials resolve to the configured account before any build starts
    pub async fn preflight(&self) -> Result<()> {
        if self.context.dry_run {
            info!("Skipping credential check in dry-run mode");
            return Ok(());
        }

        let identity = self.executor.caller_identity().await.map_err(|e| {
            ReleaseError::Config(format!(
                "AWS credentials could not be validated{}: {}",
                self.context
                    .profile
                    .as_deref()
                    .map(|p| format!(" (profile '{}')", p))
                    .unwrap_or_default(),
                e
            ))
        })?;

        if identity.account != self.context.account_id {
            return Err(ReleaseError::Config(format!(
                "credentials belong to account {} ({}) but the configured account is {}",
                identity.account, identity.arn, self.context.account_id
            )));
        }

        info!("Deploying as {}", identity.arn);
        Ok(())
    }

    /// Point the image's function at `reference`; returns the function name.
    ///
    /// Re-deploying the same reference leaves the function unchanged.
    pub async fn deploy(&self, reference: &ImageRef) -> Result<String> {
        let image = reference.image();
        let function = self.target(image);
        info!("Deploying {} to function {}", reference, function);

        self.executor
            .update_function(&function, reference)
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    warn!("Timed out waiting for function {} to update", function);
                }
                ReleaseError::Deploy {
                    image: image.to_string(),
                    function: function.clone(),
                    source,
                }
            })?;

        info!("✓ Function {} now runs {}", function, reference);
        Ok(function)
    }
}
