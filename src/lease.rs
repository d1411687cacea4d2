// Release lease: one invocation at a time per environment and registry

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::context::EnvironmentContext;
use crate::error::{ReleaseError, Result};

/// Exclusive lock held for the duration of a run; released on drop
#[derive(Debug)]
pub struct ReleaseLease {
    file: File,
    path: PathBuf,
}

/// Default directory for lease files
pub fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("pipeline-release")
}

fn lease_file_name(context: &EnvironmentContext) -> String {
    let registry: String = context
        .registry
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{}.lock", context.environment, registry)
}

impl ReleaseLease {
    /// Take the lease without waiting; fails if another invocation holds it
    pub fn acquire(dir: &Path, context: &EnvironmentContext) -> Result<Self> {
        let path = dir.join(lease_file_name(context));
        let lease_error = |reason: String| ReleaseError::Lease {
            path: path.clone(),
            reason,
        };

        fs::create_dir_all(dir).map_err(|e| lease_error(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| lease_error(e.to_string()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = fs::read_to_string(&path).unwrap_or_default();
            return Err(lease_error(format!(
                "another {} run is in progress ({})",
                context.environment,
                holder.trim()
            )));
        }

        let stamp = format!(
            "pid {} since {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        file.set_len(0)
            .and_then(|_| file.write_all(stamp.as_bytes()))
            .map_err(|e| lease_error(e.to_string()))?;

        debug!("Acquired release lease {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ReleaseLease {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released release lease {}", self.path.display());
    }
}
