// Real executor: container CLI (docker or podman) plus the AWS SDK

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::aws::AwsClients;
use super::command::run;
use super::{BuildSpec, CallerIdentity, Executor};
use crate::context::{EnvironmentContext, ImageRef};
use crate::error::CommandError;
use crate::settings::{Settings, TimeoutSettings};

pub struct ShellExecutor {
    container_cli: String,
    platform: String,
    timeouts: TimeoutSettings,
    aws: OnceCell<AwsClients>,
}

impl ShellExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            container_cli: settings.container_cli.clone(),
            platform: settings.platform.clone(),
            timeouts: settings.timeouts.clone(),
            aws: OnceCell::new(),
        }
    }

    fn container(&self) -> Command {
        Command::new(&self.container_cli)
    }

    fn session(&self, operation: &str) -> Result<&AwsClients, CommandError> {
        self.aws.get().ok_or_else(|| CommandError::Aws {
            operation: operation.to_string(),
            message: "no AWS session; the environment context was never opened".to_string(),
        })
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn open_session(&self, context: &EnvironmentContext) {
        self.aws
            .get_or_init(|| AwsClients::connect(&context.region, context.profile.as_deref()))
            .await;
    }

    async fn registry_login(&self, registry: &str) -> Result<(), CommandError> {
        info!("Logging in to registry {}", registry);

        let password = self
            .session("ecr:GetAuthorizationToken")?
            .registry_password(self.timeouts.login())
            .await?;

        debug!(
            "Executing: {} login {} --username AWS --password-stdin",
            self.container_cli, registry
        );
        let mut cmd = self.container();
        cmd.arg("login")
            .arg(registry)
            .arg("--username")
            .arg("AWS")
            .arg("--password-stdin");
        run(cmd, self.timeouts.login(), Some(password.as_bytes())).await?;

        Ok(())
    }

    async fn caller_identity(&self) -> Result<CallerIdentity, CommandError> {
        self.session("sts:GetCallerIdentity")?
            .caller_identity(self.timeouts.login())
            .await
    }

    async fn build(&self, spec: &BuildSpec) -> Result<(), CommandError> {
        info!("Building image with {}: {}", self.container_cli, spec.reference);

        let mut cmd = self.container();
        cmd.arg("build").arg("-t").arg(spec.reference.to_string());

        // Lambda runs linux/amd64 regardless of the build host
        cmd.arg("--platform").arg(&self.platform);

        for (key, value) in &spec.build_args {
            cmd.arg("--build-arg").arg(format!("{}={}", key, value));
        }

        cmd.arg(&spec.context_dir);

        run(cmd, self.timeouts.build(), None).await?;
        Ok(())
    }

    async fn push(&self, reference: &ImageRef) -> Result<(), CommandError> {
        info!("Pushing image to registry: {}", reference);

        let mut cmd = self.container();
        cmd.arg("push").arg(reference.to_string());

        run(cmd, self.timeouts.push(), None).await?;
        Ok(())
    }

    async fn update_function(
        &self,
        function: &str,
        reference: &ImageRef,
    ) -> Result<(), CommandError> {
        info!("Updating function {} to {}", function, reference);

        self.session("lambda:UpdateFunctionCode")?
            .update_function(function, &reference.to_string(), self.timeouts.deploy())
            .await
    }

    async fn local_images(&self, repository: &str) -> Result<Vec<String>, CommandError> {
        let mut cmd = self.container();
        cmd.arg("images")
            .arg("--format")
            .arg("{{.Repository}}:{{.Tag}}")
            .arg(repository);

        let stdout = run(cmd, self.timeouts.cleanup(), None).await?;
        Ok(parse_image_list(&stdout, repository))
    }

    async fn remove_image(&self, reference: &str) -> Result<(), CommandError> {
        let mut cmd = self.container();
        cmd.arg("rmi").arg(reference);

        run(cmd, self.timeouts.cleanup(), None).await?;
        Ok(())
    }
}

/// Keep tagged references of exactly `repository` from `images --format` output
fn parse_image_list(stdout: &str, repository: &str) -> Vec<String> {
    let prefix = format!("{}:", repository);
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(&prefix) && !line.ends_with(":<none>"))
        .map(str::to_string)
        .collect()
}
