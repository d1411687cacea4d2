// Scripted executor for tests: records requested actions, fails on demand

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{Action, BuildSpec, CallerIdentity, Executor};
use crate::context::{EnvironmentContext, ImageRef};
use crate::error::CommandError;

#[derive(Debug, Default)]
pub(crate) struct FakeExecutor {
    actions: Mutex<Vec<Action>>,
    session: Mutex<Option<String>>,
    local: Mutex<Vec<String>>,
    fail_login: bool,
    identity_account: Option<String>,
    fail_build: HashSet<String>,
    fail_push: HashSet<String>,
    fail_deploy: HashSet<String>,
}

fn failure(command: &str) -> CommandError {
    CommandError::Failed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "scripted failure".to_string(),
    }
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_login(mut self) -> Self {
        self.fail_login = true;
        self
    }

    pub(crate) fn with_identity(mut self, account: &str) -> Self {
        self.identity_account = Some(account.to_string());
        self
    }

    pub(crate) fn fail_build(mut self, image: &str) -> Self {
        self.fail_build.insert(image.to_string());
        self
    }

    pub(crate) fn fail_push(mut self, image: &str) -> Self {
        self.fail_push.insert(image.to_string());
        self
    }

    pub(crate) fn fail_deploy(mut self, image: &str) -> Self {
        self.fail_deploy.insert(image.to_string());
        self
    }

    /// Seed the local image store
    pub(crate) fn with_local_images<I, S>(self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local
            .lock()
            .unwrap()
            .extend(references.into_iter().map(Into::into));
        self
    }

    pub(crate) fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    /// Region the AWS session was opened for, if any
    pub(crate) fn session_region(&self) -> Option<String> {
        self.session.lock().unwrap().clone()
    }

    pub(crate) fn local(&self) -> Vec<String> {
        self.local.lock().unwrap().clone()
    }

    /// References of requested builds, in order
    pub(crate) fn built(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Build { reference, .. } => Some(reference),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn pushed(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Push { reference } => Some(reference),
                _ => None,
            })
            .collect()
    }

    /// Function names of requested deploys, in order
    pub(crate) fn deployed(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::UpdateFunction { function, .. } => Some(function),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::RemoveImage { reference } => Some(reference),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn open_session(&self, context: &EnvironmentContext) {
        *self.session.lock().unwrap() = Some(context.region.clone());
    }

    async fn registry_login(&self, registry: &str) -> Result<(), CommandError> {
        self.record(Action::RegistryLogin {
            registry: registry.to_string(),
        });
        if self.fail_login {
            return Err(failure("docker login"));
        }
        Ok(())
    }

    async fn caller_identity(&self) -> Result<CallerIdentity, CommandError> {
        let account = self
            .identity_account
            .clone()
            .unwrap_or_else(|| "123456789012".to_string());
        Ok(CallerIdentity {
            arn: format!("arn:aws:iam::{}:user/ci", account),
            account,
        })
    }

    async fn build(&self, spec: &BuildSpec) -> Result<(), CommandError> {
        self.record(Action::Build {
            reference: spec.reference.to_string(),
            context_dir: spec.context_dir.clone(),
        });
        if self.fail_build.contains(spec.image.as_str()) {
            return Err(failure("docker build"));
        }
        self.local.lock().unwrap().push(spec.reference.to_string());
        Ok(())
    }

    async fn push(&self, reference: &ImageRef) -> Result<(), CommandError> {
        self.record(Action::Push {
            reference: reference.to_string(),
        });
        if self.fail_push.contains(reference.image().as_str()) {
            return Err(failure("docker push"));
        }
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
        if self.fail_deploy.contains(reference.image().as_str()) {
            return Err(CommandError::Aws {
                operation: "lambda:UpdateFunctionCode".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn local_images(&self, repository: &str) -> Result<Vec<String>, CommandError> {
        let prefix = format!("{}:", repository);
        Ok(self
            .local
            .lock()
            .unwrap()
            .iter()
            .filter(|reference| reference.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn remove_image(&self, reference: &str) -> Result<(), CommandError> {
        self.record(Action::RemoveImage {
            reference: reference.to_string(),
        });
        let mut local = self.local.lock().unwrap();
        match local.iter().position(|r| r == reference) {
            Some(index) => {
                local.remove(index);
                Ok(())
            }
            None => Err(failure("docker rmi")),
        }
    }
}
