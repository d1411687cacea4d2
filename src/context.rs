// Environment context: read-only values shared by every stage of one invocation

use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::catalog::ImageName;
use crate::error::{ReleaseError, Result};
use crate::git::SourceControl;
use crate::settings::Settings;

/// Characters of the commit SHA used in dev tags
pub const SHORT_SHA_LEN: usize = 7;

const PLACEHOLDER_ACCOUNT: &str = "000000000000";
const PLACEHOLDER_REGION: &str = "us-east-1";
const PLACEHOLDER_SHA: &str = "0000000000000000000000000000000000000000";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized short form of a commit SHA
pub fn short_sha(commit_sha: &str) -> String {
    commit_sha
        .trim()
        .to_ascii_lowercase()
        .chars()
        .take(SHORT_SHA_LEN)
        .collect()
}

/// Dev tag for a commit: `dev-<short-sha>`
pub fn dev_tag(commit_sha: &str) -> String {
    format!("dev-{}", short_sha(commit_sha))
}

/// Check that an operator-supplied release version is usable as an image tag
pub fn validate_release_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(ReleaseError::Usage(
            "a non-empty release version is required (--version <VERSION>)".to_string(),
        ));
    }

    let valid_first = version
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    let valid_rest = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !valid_first || !valid_rest || version.len() > 128 {
        return Err(ReleaseError::Usage(format!(
            "release version '{}' is not a valid image tag (allowed: letters, digits, '_', '.', '-'; at most 128 characters; must not start with '.' or '-')",
            version
        )));
    }
    Ok(())
}

/// ECR registry host for an account and region
pub fn ecr_host(account_id: &str, region: &str) -> String {
    format!("{}.dkr.ecr.{}.amazonaws.com", account_id, region)
}

/// Fully qualified image reference: `<registry>/<environment>/<image>:<tag>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    registry: String,
    environment: Environment,
    image: ImageName,
    tag: String,
}

impl ImageRef {
    pub fn new(
        registry: impl Into<String>,
        environment: Environment,
        image: ImageName,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            environment,
            image,
            tag: tag.into(),
        }
    }

    pub fn image(&self) -> &ImageName {
        &self.image
    }

    /// Everything before the `:tag`
    pub fn repository(&self) -> String {
        repository(&self.registry, self.environment, &self.image)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}

pub fn repository(registry: &str, environment: Environment, image: &ImageName) -> String {
    format!("{}/{}/{}", registry, environment, image)
}

/// Process-wide values resolved once per invocation. Never mutated after `load`.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub environment: Environment,
    pub registry: String,
    pub account_id: String,
    pub region: String,
    pub profile: Option<String>,
    pub commit_sha: String,
    pub build_timestamp: String,
    pub dry_run: bool,
    pub release_version: Option<String>,
    tag: String,
}

impl EnvironmentContext {
    /// Resolve the context from settings.
    ///
    /// Outside dry-run a missing account id, region or commit SHA is a
    /// configuration error; in dry-run placeholders are used instead because
    /// nothing leaves the machine.
    pub async fn load(
        settings: &Settings,
        environment: Environment,
        dry_run: bool,
        release_version: Option<String>,
        source: &dyn SourceControl,
    ) -> Result<Self> {
        let tag = match (environment, &release_version) {
            (Environment::Prod, Some(version)) => {
                validate_release_version(version)?;
                Some(version.clone())
            }
            (Environment::Prod, None) => {
                return Err(ReleaseError::Usage(
                    "a release version is required for prod (--version <VERSION>)".to_string(),
                ))
            }
            (Environment::Dev, _) => None,
        };

        let account_id = required(
            settings.account_id.as_deref(),
            "account_id",
            "AWS_ACCOUNT_ID",
            PLACEHOLDER_ACCOUNT,
            dry_run,
        )?;
        let region = required(
            settings.region.as_deref(),
            "region",
            "AWS_REGION",
            PLACEHOLDER_REGION,
            dry_run,
        )?;

        let configured_sha = settings
            .commit_sha
            .as_deref()
            .filter(|s| !s.trim().is_empty());
        let commit_sha = match configured_sha {
            Some(sha) => sha.trim().to_string(),
            None => match source.head_commit().await {
                Ok(sha) => sha,
                Err(e) if dry_run => {
                    warn!("Could not resolve HEAD ({}); using placeholder commit", e);
                    PLACEHOLDER_SHA.to_string()
                }
                Err(e) => {
                    return Err(ReleaseError::Config(format!(
                        "commit SHA not configured and `git rev-parse HEAD` failed: {}. Set GIT_SHA.",
                        e
                    )))
                }
            },
        };

        let build_timestamp = settings
            .build_timestamp
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        let registry = settings
            .registry
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ecr_host(&account_id, &region));

        let tag = tag.unwrap_or_else(|| dev_tag(&commit_sha));

        info!(
            environment = %environment,
            registry = %registry,
            tag = %tag,
            dry_run = dry_run,
            "Environment context loaded"
        );

        Ok(Self {
            environment,
            registry,
            account_id,
            region,
            profile: settings.profile.clone().filter(|s| !s.is_empty()),
            commit_sha,
            build_timestamp,
            dry_run,
            release_version,
            tag,
        })
    }

    /// Tag applied to every image built in this invocation
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn reference(&self, image: &ImageName) -> ImageRef {
        ImageRef::new(&self.registry, self.environment, image.clone(), &self.tag)
    }

    pub fn repository(&self, environment: Environment, image: &ImageName) -> String {
        repository(&self.registry, environment, image)
    }

    /// Build arguments injected verbatim into every build
    pub fn build_args(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert("COMMIT_SHA".to_string(), self.commit_sha.clone());
        args.insert("BUILD_TIMESTAMP".to_string(), self.build_timestamp.clone());
        args.insert("ENVIRONMENT".to_string(), self.environment.to_string());
        if let Some(version) = &self.release_version {
            args.insert("RELEASE_VERSION".to_string(), version.clone());
        }
        args
    }
}

fn required(
    value: Option<&str>,
    field: &str,
    variable: &str,
    placeholder: &str,
    dry_run: bool,
) -> Result<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v.to_string()),
        None if dry_run => {
            warn!("{} not configured; using placeholder '{}' for dry run", field, placeholder);
            Ok(placeholder.to_string())
        }
        None => Err(ReleaseError::Config(format!(
            "'{}' is not configured. Set {} or RELEASE_{}.",
            field,
            variable,
            field.to_ascii_uppercase()
        ))),
    }
}
