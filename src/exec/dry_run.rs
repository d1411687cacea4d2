// Dry-run executor: logs and records intended actions, performs none

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use super::{Action, BuildSpec, CallerIdentity, Executor};
use crate::context::ImageRef;
use crate::error::CommandError;

/// Marker prefixed to every log line describing an action that was not performed
pub const DRY_RUN_MARKER: &str = "[dry-run]";

#[derive(Debug, Default)]
pub struct DryRunExecutor {
    actions: Mutex<Vec<Action>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions that would have been performed, in request order
    pub fn actions(&self) -> Vec<Action> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    fn record(&self, action: Action) {
        info!("{} would {}", DRY_RUN_MARKER, action);
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn registry_login(&self, registry: &str) -> Result<(), CommandError> {
        self.record(Action::RegistryLogin {
            registry: registry.to_string(),
        });
        Ok(())
    }

    async fn caller_identity(&self) -> Result<CallerIdentity, CommandError> {
        Ok(CallerIdentity {
            account: "dry-run".to_string(),
            arn: "dry-run".to_string(),
        })
    }

    async fn build(&self, spec: &BuildSpec) -> Result<(), CommandError> {
        for (key, value) in &spec.build_args {
            info!("{} build arg {}={}", DRY_RUN_MARKER, key, value);
        }
        self.record(Action::Build {
            reference: spec.reference.to_string(),
            context_dir: spec.context_dir.clone(),
        });
        Ok(())
    }

    async fn push(&self, reference: &ImageRef) -> Result<(), CommandError> {
        self.record(Action::Push {
            reference: reference.to_string(),
        });
        Ok(())
    }

    async fn update_function(
        &self,
        function: &str,
        reference: &ImageRef,
    ) -> Result<(), CommandError> {
        self.record(Action::UpdateFunction {
            function: function.to_string(),
            reference: reference.to_string(),
        });
        Ok(())
    }

    async fn local_images(&self, _repository: &str) -> Result<Vec<String>, CommandError> {
        Ok(Vec::new())
    }

    async fn remove_image(&self, reference: &str) -> Result<(), CommandError> {
        self.record(Action::RemoveImage {
            reference: reference.to_string(),
        });
        Ok(())
    }
}
