use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "release.toml";

/// Conventional variables that take precedence over `RELEASE_*` and the config file.
/// The first non-empty variable in each list wins.
const CONVENTIONAL_VARS: &[(&str, &[&str])] = &[
    ("account_id", &["AWS_ACCOUNT_ID"]),
    ("region", &["AWS_REGION", "AWS_DEFAULT_REGION"]),
    ("profile", &["AWS_PROFILE"]),
    ("commit_sha", &["GIT_SHA"]),
    ("build_timestamp", &["BUILD_TIMESTAMP"]),
];

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Directory scanned for image build descriptors
    #[serde(default = "default_pipeline_root")]
    pub pipeline_root: PathBuf,

    /// File name marking a directory as a buildable image
    #[serde(default = "default_build_descriptor")]
    pub build_descriptor: String,

    /// Reference branch for dev change detection (three-dot diff against HEAD)
    #[serde(default = "default_reference_branch")]
    pub reference_branch: String,

    /// Paths (relative to the repository root) whose changes mark every image changed.
    /// Empty means only changes inside an image's own directory count.
    #[serde(default)]
    pub shared_paths: Vec<PathBuf>,

    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Named AWS credential profile for the SDK session
    #[serde(default)]
    pub profile: Option<String>,

    /// Registry host override; defaults to the account's ECR host
    #[serde(default)]
    pub registry: Option<String>,

    /// Commit SHA override; defaults to `git rev-parse HEAD`
    #[serde(default)]
    pub commit_sha: Option<String>,

    /// Build timestamp override; defaults to the invocation time
    #[serde(default)]
    pub build_timestamp: Option<String>,

    /// Container CLI to use (docker or podman)
    #[serde(default = "default_container_cli")]
    pub container_cli: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    /// Number of images built and pushed concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Extra build/push attempts per image on the dev path
    #[serde(default)]
    pub dev_retries: u32,

    /// Directory holding release lease files (default: system temp dir)
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,

    #[serde(default)]
    pub functions: FunctionSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Function name templates. `{image}` is required, `{environment}` is optional.
#[derive(Debug, Deserialize, Clone)]
pub struct FunctionSettings {
    #[serde(default = "default_dev_function")]
    pub dev: String,
    #[serde(default = "default_prod_function")]
    pub prod: String,
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            dev: default_dev_function(),
            prod: default_prod_function(),
        }
    }
}

/// Per-call timeouts for external commands, in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutSettings {
    #[serde(default = "default_login_secs")]
    pub login_secs: u64,
    #[serde(default = "default_git_secs")]
    pub git_secs: u64,
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    #[serde(default = "default_push_secs")]
    pub push_secs: u64,
    #[serde(default = "default_deploy_secs")]
    pub deploy_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            login_secs: default_login_secs(),
            git_secs: default_git_secs(),
            build_secs: default_build_secs(),
            push_secs: default_push_secs(),
            deploy_secs: default_deploy_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_secs)
    }

    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn push(&self) -> Duration {
        Duration::from_secs(self.push_secs)
    }

    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

fn default_pipeline_root() -> PathBuf {
    PathBuf::from("pipeline")
}

fn default_build_descriptor() -> String {
    "Dockerfile".to_string()
}

fn default_reference_branch() -> String {
    "origin/main".to_string()
}

fn default_container_cli() -> String {
    "docker".to_string()
}

fn default_platform() -> String {
    "linux/amd64".to_string()
}

fn default_jobs() -> usize {
    1
}

fn default_dev_function() -> String {
    "{image}-dev".to_string()
}

fn default_prod_function() -> String {
    "{image}".to_string()
}

fn default_login_secs() -> u64 {
    120
}

fn default_git_secs() -> u64 {
    60
}

fn default_build_secs() -> u64 {
    3600 // 1 hour
}

fn default_push_secs() -> u64 {
    1800
}

fn default_deploy_secs() -> u64 {
    600
}

fn default_cleanup_secs() -> u64 {
    120
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

impl Settings {
    /// Load settings from the process environment and an optional config file
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(file, &vars)
    }

    /// Load settings with precedence (highest to lowest):
    /// 1. Conventional variables (AWS_REGION, GIT_SHA, ...)
    /// 2. RELEASE_* variables (nested fields separated by `__`)
    /// 3. Config file (explicit path, or release.toml if present)
    /// 4. Defaults
    pub fn load_from(file: Option<&Path>, vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match file {
            Some(path) => {
                tracing::info!("Loading config file: {}", path.display());
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    tracing::info!("Loading config file: {}", path.display());
                    builder = builder.add_source(config::File::from(path).required(false));
                } else {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                }
            }
        }

        let release_vars: config::Map<String, String> = vars
            .iter()
            .filter(|(key, _)| key.starts_with("RELEASE_"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        builder = builder.add_source(
            Environment::with_prefix("RELEASE")
                .prefix_separator("_")
                .separator("__")
                .source(Some(release_vars)),
        );

        for (key, names) in CONVENTIONAL_VARS {
            if let Some(value) = names.iter().find_map(|name| non_empty(vars, name)) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config = builder.build()?;

        // Deserialize and collect any unused fields
        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(config, |path| {
            unused_fields.push(path.to_string());
        })?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_format_string(&self.functions.dev, "functions.dev")?;
        Self::validate_format_string(&self.functions.prod, "functions.prod")?;

        if self.jobs == 0 {
            return Err(ConfigError::Message(
                "'jobs' must be at least 1".to_string(),
            ));
        }
        if self.build_descriptor.is_empty() {
            return Err(ConfigError::Message(
                "'build_descriptor' must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Function name templates must contain `{image}` and no other placeholder
    /// than `{environment}`.
    fn validate_format_string(format_str: &str, field_name: &str) -> Result<(), ConfigError> {
        if !format_str.contains("{image}") {
            return Err(ConfigError::Message(format!(
                "'{}' must contain '{{image}}' placeholder. Got: '{}'",
                field_name, format_str
            )));
        }
        let remainder = format_str
            .replace("{image}", "")
            .replace("{environment}", "");
        if remainder.contains('{') || remainder.contains('}') {
            return Err(ConfigError::Message(format!(
                "'{}' may only use the '{{image}}' and '{{environment}}' placeholders. Got: '{}'",
                field_name, format_str
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("release.toml");
        std::fs::write(&path, contents).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_defaults_without_sources() {
        let (_dir, path) = write_config("");
        let settings = Settings::load_from(Some(&path), &HashMap::new()).unwrap();

        assert_eq!(settings.pipeline_root, PathBuf::from("pipeline"));
        assert_eq!(settings.build_descriptor, "Dockerfile");
        assert_eq!(settings.reference_branch, "origin/main");
        assert_eq!(settings.jobs, 1);
        assert_eq!(settings.functions.dev, "{image}-dev");
        assert_eq!(settings.functions.prod, "{image}");
        assert_eq!(settings.timeouts.build(), Duration::from_secs(3600));
        assert!(settings.account_id.is_none());
    }

    #[test]
    fn test_file_then_release_vars_then_conventional_vars() {
        let (_dir, path) = write_config(
            r#"
region = "eu-west-1"
account_id = "111111111111"
shared_paths = ["pipeline/common"]

[timeouts]
build_secs = 900
"#,
        );
        let env = vars(&[
            ("RELEASE_ACCOUNT_ID", "222222222222"),
            ("RELEASE_JOBS", "4"),
            ("RELEASE_TIMEOUTS__PUSH_SECS", "60"),
            ("AWS_REGION", "us-west-2"),
            ("GIT_SHA", "0123456789abcdef"),
        ]);

        let settings = Settings::load_from(Some(&path), &env).unwrap();

        assert_eq!(settings.account_id.as_deref(), Some("222222222222"));
        assert_eq!(settings.region.as_deref(), Some("us-west-2"));
        assert_eq!(settings.commit_sha.as_deref(), Some("0123456789abcdef"));
        assert_eq!(settings.jobs, 4);
        assert_eq!(settings.timeouts.build_secs, 900);
        assert_eq!(settings.timeouts.push_secs, 60);
        assert_eq!(settings.shared_paths, vec![PathBuf::from("pipeline/common")]);
    }

    #[test]
    fn test_default_region_fallback_and_empty_values_ignored() {
        let (_dir, path) = write_config("");
        let env = vars(&[("AWS_REGION", ""), ("AWS_DEFAULT_REGION", "ap-south-1")]);

        let settings = Settings::load_from(Some(&path), &env).unwrap();
        assert_eq!(settings.region.as_deref(), Some("ap-south-1"));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let (_dir, path) = write_config(
            r#"
pipeline_root = "stages"
not_a_setting = true
"#,
        );
        let settings = Settings::load_from(Some(&path), &HashMap::new()).unwrap();
        assert_eq!(settings.pipeline_root, PathBuf::from("stages"));
    }

    #[test]
    fn test_function_template_requires_image_placeholder() {
        let (_dir, path) = write_config(
            r#"
[functions]
dev = "{environment}-lambda"
"#,
        );
        let err = Settings::load_from(Some(&path), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("functions.dev"));
    }

    #[test]
    fn test_function_template_rejects_unknown_placeholder() {
        let (_dir, path) = write_config(
            r#"
[functions]
prod = "{image}-{region}"
"#,
        );
        let err = Settings::load_from(Some(&path), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("functions.prod"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let (_dir, path) = write_config("jobs = 0\n");
        assert!(Settings::load_from(Some(&path), &HashMap::new()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing.toml");
        assert!(Settings::load_from(Some(&path), &HashMap::new()).is_err());
    }
}
