use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single external command run through an executor.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Leaf error: the io failure is part of the message, not a chained source
    #[error("failed to start `{program}`: {error}")]
    Spawn {
        program: String,
        error: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", after.as_secs())]
    TimedOut { command: String, after: Duration },

    #[error("unexpected output from `{command}`: {message}")]
    Output { command: String, message: String },

    #[error("{operation} failed: {message}")]
    Aws { operation: String, message: String },
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::TimedOut { .. })
    }
}

/// Errors that end a pipeline run (or, in dev, a single image's part of it).
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No images found under {root} (looked for '{marker}' files)")]
    CatalogEmpty { root: PathBuf, marker: String },

    #[error(
        "Image name '{name}' is ambiguous: both {} and {} contain a build descriptor",
        first.display(),
        second.display()
    )]
    NameCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Failed to scan {}", root.display())]
    Catalog {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Change detection against '{base}' failed")]
    ChangeDetection {
        base: String,
        #[source]
        source: CommandError,
    },

    #[error("Registry authentication for {registry} failed")]
    Registry {
        registry: String,
        #[source]
        source: CommandError,
    },

    #[error("Build of '{image}' failed")]
    Build {
        image: String,
        #[source]
        source: CommandError,
    },

    #[error("Push of '{image}' failed")]
    Push {
        image: String,
        #[source]
        source: CommandError,
    },

    #[error("Deploy of '{image}' to function '{function}' failed")]
    Deploy {
        image: String,
        function: String,
        #[source]
        source: CommandError,
    },

    #[error(
        "Release {version} is PARTIALLY APPLIED: deployed [{}] before '{failed}' failed, remaining [{}] not deployed",
        deployed.join(", "),
        pending.join(", ")
    )]
    PartialRelease {
        version: String,
        deployed: Vec<String>,
        failed: String,
        pending: Vec<String>,
        #[source]
        source: Box<ReleaseError>,
    },

    #[error("Could not acquire release lease {}: {reason}", path.display())]
    Lease { path: PathBuf, reason: String },
}

impl ReleaseError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReleaseError::Usage(_) => 2,
            _ => 1,
        }
    }

    /// This error followed by its causes, `: `-separated, for logs and reports
    pub fn full_message(&self) -> String {
        anyhow::Chain::new(self)
            .map(|cause| cause.to_string())
            .collect::<Vec<_>>()
            .join(": ")
    }
}

pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;
