use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod build;
mod catalog;
mod changes;
mod cleanup;
mod context;
mod deploy;
mod error;
mod exec;
mod git;
mod lease;
mod pipeline;
mod settings;

use deploy::DeploymentTargets;
use error::ReleaseError;
use exec::{DryRunExecutor, Executor, ShellExecutor, DRY_RUN_MARKER};
use git::GitCli;
use pipeline::{DevOptions, Pipeline, ProdOptions};
use settings::Settings;

/// Exit code after an operator interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: release.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, push and deploy changed images to the dev environment
    RunDev {
        /// Rebuild every image, skipping change detection
        #[arg(long)]
        all: bool,
        /// Log intended actions without performing them
        #[arg(long)]
        dry_run: bool,
        /// Reference branch to diff against (default from configuration)
        #[arg(long, value_name = "REF")]
        base: Option<String>,
        /// Number of images built and pushed concurrently
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },
    /// Release every image to prod under an explicit version
    #[command(disable_version_flag = true)]
    RunProd {
        /// Release version, used verbatim as the image tag
        #[arg(long, value_name = "VERSION")]
        version: Option<String>,
        /// Keep local images after a successful release
        #[arg(long)]
        no_cleanup: bool,
        /// Log intended actions without performing them
        #[arg(long)]
        dry_run: bool,
        /// Number of images built and pushed concurrently
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },
    /// List the images found under the pipeline root
    ListImages,
}

/// The executor a pipeline run goes through
enum Runner {
    DryRun(DryRunExecutor),
    Shell(ShellExecutor),
}

impl Runner {
    fn new(settings: &Settings, dry_run: bool) -> Self {
        if dry_run {
            info!("Dry run: no command will be executed");
            Runner::DryRun(DryRunExecutor::new())
        } else {
            Runner::Shell(ShellExecutor::new(settings))
        }
    }

    fn executor(&self) -> &dyn Executor {
        match self {
            Runner::DryRun(executor) => executor,
            Runner::Shell(executor) => executor,
        }
    }

    fn finish(&self) {
        if let Runner::DryRun(executor) = self {
            info!(
                "{} {} action(s) planned, none performed",
                DRY_RUN_MARKER,
                executor.actions().len()
            );
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    // A bad prod version is a usage error whatever the configuration says
    if let Commands::RunProd { version, .. } = &cli.command {
        pipeline::release_version(version.as_deref())?;
    }

    let settings =
        Settings::load(cli.config.as_deref()).map_err(|e| ReleaseError::Config(e.to_string()))?;

    let workdir = std::env::current_dir().context("Failed to determine the working directory")?;
    let source = GitCli::new(workdir, settings.timeouts.git());
    let targets = DeploymentTargets::from_settings(&settings.functions);

    match cli.command {
        Commands::ListImages => {
            let catalog = catalog::discover(&settings.pipeline_root, &settings.build_descriptor)?;
            for image in catalog.images() {
                println!("{}", image.name);
            }
            Ok(0)
        }
        Commands::RunDev {
            all,
            dry_run,
            base,
            jobs,
        } => {
            let runner = Runner::new(&settings, dry_run);
            let report = Pipeline::new(&settings, runner.executor(), &source, targets)
                .run_dev(&DevOptions {
                    all,
                    dry_run,
                    base,
                    jobs,
                })
                .await?;
            runner.finish();
            report.print_summary();
            Ok(if report.is_success() { 0 } else { 1 })
        }
        Commands::RunProd {
            version,
            no_cleanup,
            dry_run,
            jobs,
        } => {
            let runner = Runner::new(&settings, dry_run);
            let report = Pipeline::new(&settings, runner.executor(), &source, targets)
                .run_prod(&ProdOptions {
                    version,
                    no_cleanup,
                    dry_run,
                    jobs,
                })
                .await?;
            runner.finish();
            report.print_summary();
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Dropping the run future kills in-flight child processes and releases the lease
    let code = tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                e.downcast_ref::<ReleaseError>()
                    .map(ReleaseError::exit_code)
                    .unwrap_or(1)
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; in-flight commands were stopped and nothing further was deployed");
            EXIT_INTERRUPTED
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_prod_accepts_version_option() {
        let cli = Cli::try_parse_from([
            "pipeline-release",
            "run-prod",
            "--version",
            "v1.2.0",
            "--no-cleanup",
        ])
        .unwrap();
        match cli.command {
            Commands::RunProd {
                version,
                no_cleanup,
                dry_run,
                ..
            } => {
                assert_eq!(version.as_deref(), Some("v1.2.0"));
                assert!(no_cleanup);
                assert!(!dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_dev_flags() {
        let cli = Cli::try_parse_from([
            "pipeline-release",
            "--config",
            "ci.toml",
            "run-dev",
            "--all",
            "--dry-run",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        match cli.command {
            Commands::RunDev {
                all, dry_run, jobs, ..
            } => {
                assert!(all && dry_run);
                assert_eq!(jobs, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_prod_version_wins_over_broken_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = temp_dir.path().join("release.toml");
        std::fs::write(&config, "region = [unterminated").unwrap();

        for extra in [&[][..], &["--version", " v1.0.0"][..]] {
            let mut args = vec!["pipeline-release", "--config", config.to_str().unwrap(), "run-prod"];
            args.extend_from_slice(extra);
            let cli = Cli::try_parse_from(args).unwrap();

            let err = run(cli).await.unwrap_err();
            let release_error = err.downcast_ref::<ReleaseError>().unwrap();
            assert!(matches!(release_error, ReleaseError::Usage(_)));
            assert_eq!(release_error.exit_code(), 2);
        }
    }

    #[tokio::test]
    async fn test_broken_config_is_a_config_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = temp_dir.path().join("release.toml");
        std::fs::write(&config, "region = [unterminated").unwrap();

        let cli = Cli::try_parse_from([
            "pipeline-release",
            "--config",
            config.to_str().unwrap(),
            "run-prod",
            "--version",
            "v1.0.0",
        ])
        .unwrap();

        let err = run(cli).await.unwrap_err();
        let release_error = err.downcast_ref::<ReleaseError>().unwrap();
        assert!(matches!(release_error, ReleaseError::Config(_)));
        assert_eq!(release_error.exit_code(), 1);
    }
}
