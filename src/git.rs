// Read-only git access used for commit resolution and change detection

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::error::CommandError;
use crate::exec::command::run;

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Full SHA of HEAD
    async fn head_commit(&self) -> Result<String, CommandError>;

    /// Absolute path of the repository's top-level directory
    async fn toplevel(&self) -> Result<PathBuf, CommandError>;

    /// Files changed between the merge base of `base` and HEAD (`base...HEAD`),
    /// relative to the repository top level
    async fn changed_files(&self, base: &str) -> Result<Vec<PathBuf>, CommandError>;
}

pub struct GitCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.workdir);
        cmd
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `base...HEAD` diff with verbatim, NUL-separated paths
    fn diff_command(&self, base: &str) -> Command {
        let mut cmd = self.git();
        cmd.args(["-c", "core.quotePath=false"])
            .arg("diff")
            .arg("--name-only")
            .arg("-z")
            .arg("--no-renames")
            .arg(format!("{}...HEAD", base));
        cmd
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn head_commit(&self) -> Result<String, CommandError> {
        let mut cmd = self.git();
        cmd.args(["rev-parse", "HEAD"]);
        Ok(run(cmd, self.timeout, None).await?.trim().to_string())
    }

    async fn toplevel(&self) -> Result<PathBuf, CommandError> {
        let mut cmd = self.git();
        cmd.args(["rev-parse", "--show-toplevel"]);
        let stdout = run(cmd, self.timeout, None).await?;
        let toplevel = stdout.trim();
        if toplevel.is_empty() {
            return Err(CommandError::Output {
                command: format!("git -C {} rev-parse --show-toplevel", self.workdir().display()),
                message: "empty output".to_string(),
            });
        }
        Ok(PathBuf::from(toplevel))
    }

    async fn changed_files(&self, base: &str) -> Result<Vec<PathBuf>, CommandError> {
        let stdout = run(self.diff_command(base), self.timeout, None).await?;
        Ok(parse_name_list(&stdout))
    }
}

/// Split `--name-only -z` output; paths are never quoted or escaped there
fn parse_name_list(stdout: &str) -> Vec<PathBuf> {
    stdout
        .split('\0')
        .filter(|name| !name.is_empty())
        .map(PathBuf::from)
        .collect()
}
