// Prod release pipeline: all images, all-or-nothing, cleanup after success

use tracing::{error, info, warn};

use super::report::{ImageOutcome, RunReport};
use super::{Pipeline, Stage, StageTracker};
use crate::build::{self, Builder, FailurePolicy};
use crate::changes::select_build_set;
use crate::cleanup::Cleanup;
use crate::context::{validate_release_version, Environment, EnvironmentContext};
use crate::deploy::Deployer;
use crate::error::{ReleaseError, Result};

#[derive(Debug, Clone, Default)]
pub struct ProdOptions {
    /// Release version used verbatim as the tag
    pub version: Option<String>,
    pub no_cleanup: bool,
    pub dry_run: bool,
    pub jobs: Option<usize>,
}

/// Check the operator-supplied prod version; it becomes the tag verbatim.
///
/// Missing, blank or whitespace-padded versions are usage errors.
pub fn release_version(version: Option<&str>) -> Result<String> {
    let version = version.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        ReleaseError::Usage("a release version is required for prod (--version <VERSION>)".to_string())
    })?;
    if version.trim() != version {
        return Err(ReleaseError::Usage(format!(
            "release version '{}' must not have leading or trailing whitespace",
            version
        )));
    }
    validate_release_version(version)?;
    Ok(version.to_string())
}

impl Pipeline<'_> {
    /// Run a prod release.
    ///
    /// Any build, push or deploy failure aborts the release. Images deployed
    /// before a deploy failure stay deployed and are named in the returned
    /// `PartialRelease` error.
    pub async fn run_prod(&self, options: &ProdOptions) -> Result<RunReport> {
        let mut stages = StageTracker::new(Environment::Prod);
        let result = self.prod(options, &mut stages).await;
        if result.is_err() {
            stages.fail();
        }
        result
    }

    async fn prod(&self, options: &ProdOptions, stages: &mut StageTracker) -> Result<RunReport> {
        let version = release_version(options.version.as_deref())?;

        let context = EnvironmentContext::load(
            self.settings,
            Environment::Prod,
            options.dry_run,
            Some(version.clone()),
            self.source,
        )
        .await?;
        self.executor.open_session(&context).await;
        stages.advance(Stage::ContextLoaded);

        let _lease = self.lease(&context)?;
        build::authenticate(&context, self.executor).await?;
        let deployer = Deployer::new(&context, self.executor, &self.targets);
        deployer.preflight().await?;

        let catalog = self.discover()?;
        stages.advance(Stage::CatalogLoaded);

        let selected = select_build_set(&catalog, None);
        stages.advance(Stage::SetSelected);
        info!("Releasing {} image(s) as {}", selected.len(), version);

        let builder = Builder::new(&context, self.executor);
        let outcomes = builder
            .build_all(
                &selected,
                self.jobs(options.jobs),
                0,
                FailurePolicy::Abort,
            )
            .await;

        let mut pushed = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.result {
                Ok(reference) => pushed.push((outcome.image, reference)),
                Err(e) => {
                    error!("Release {} aborted before deploy; nothing was deployed", version);
                    return Err(e);
                }
            }
        }
        stages.advance(Stage::Built);

        let mut report = RunReport::new(&context);
        let mut deployed: Vec<String> = Vec::new();
        for (index, (image, reference)) in pushed.iter().enumerate() {
            match deployer.deploy(reference).await {
                Ok(function) => {
                    deployed.push(image.to_string());
                    report.record(
                        image.clone(),
                        ImageOutcome::Deployed {
                            reference: reference.to_string(),
                            function,
                        },
                    );
                }
                Err(e) if deployed.is_empty() => return Err(e),
                Err(e) => {
                    let pending: Vec<String> = pushed[index + 1..]
                        .iter()
                        .map(|(image, _)| image.to_string())
                        .collect();
                    let err = ReleaseError::PartialRelease {
                        version: version.clone(),
                        deployed,
                        failed: image.to_string(),
                        pending,
                        source: Box::new(e),
                    };
                    error!("{}", err.full_message());
                    return Err(err);
                }
            }
        }
        stages.advance(Stage::Deployed);

        if options.no_cleanup {
            info!("Skipping cleanup (--no-cleanup)");
        } else if context.dry_run {
            info!("Skipping cleanup in dry-run mode");
        } else {
            let released: Vec<_> = pushed.into_iter().map(|(image, _)| image).collect();
            let summary = Cleanup::new(&context, self.executor).run(&released).await;
            if !summary.failed.is_empty() {
                warn!("Cleanup left {} local image(s) behind", summary.failed.len());
            }
            report.cleanup = Some(summary);
            stages.advance(Stage::CleanedUp);
        }

        stages.advance(Stage::Done);
        report.stage = stages.current();
        info!("✓ Release {} complete", version);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeploymentTargets;
    use crate::exec::testing::FakeExecutor;
    use crate::exec::{Action, DryRunExecutor};
    use crate::git::testing::FakeSourceControl;
    use crate::pipeline::testing::workspace;
    use crate::settings::FunctionSettings;

    const HOST: &str = "123456789012.dkr.ecr.us-west-2.amazonaws.com";

    fn targets() -> DeploymentTargets {
        DeploymentTargets::from_settings(&FunctionSettings::default())
    }

    fn release(version: &str) -> ProdOptions {
        ProdOptions {
            version: Some(version.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_prod_build_failure_aborts_before_deploy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b", "c"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new().fail_build("b");

        let err = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&release("v2.0.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::Build { ref image, .. } if image == "b"));
        assert_ne!(err.exit_code(), 0);
        assert!(executor.deployed().is_empty());
        assert!(!executor.built().iter().any(|r| r.contains("/c:")));
        assert!(executor.removed().is_empty());
    }

    #[tokio::test]
    async fn test_prod_push_failure_aborts_before_deploy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new().fail_push("b");

        let err = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&release("v2.0.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::Push { .. }));
        assert!(executor.deployed().is_empty());
    }

    #[tokio::test]
    async fn test_prod_deploy_failure_reports_partial_release() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b", "c"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new().fail_deploy("b");

        let err = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&release("v2.0.0"))
            .await
            .unwrap_err();

        match err {
            ReleaseError::PartialRelease {
                deployed,
                failed,
                pending,
                ..
            } => {
                assert_eq!(deployed, vec!["a"]);
                assert_eq!(failed, "b");
                assert_eq!(pending, vec!["c"]);
            }
            other => panic!("expected partial release, got {other:?}"),
        }
        // Every build finished before the first deploy
        assert_eq!(executor.pushed().len(), 3);
        assert_eq!(executor.deployed(), vec!["a", "b"]);
        assert!(executor.removed().is_empty());
    }

    #[tokio::test]
    async fn test_prod_first_deploy_failure_is_plain_deploy_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new().fail_deploy("a");

        let err = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&release("v2.0.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::Deploy { .. }));
        assert_eq!(executor.deployed(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_missing_version_fails_before_any_side_effect() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new();
        let pipeline = Pipeline::new(&settings, &executor, &source, targets());

        for options in [ProdOptions::default(), release("   ")] {
            let err = pipeline.run_prod(&options).await.unwrap_err();
            assert!(matches!(err, ReleaseError::Usage(_)));
            assert_eq!(err.exit_code(), 2);
        }
        assert!(executor.actions().is_empty());
        assert!(!temp_dir.path().join("locks").exists());
    }

    #[tokio::test]
    async fn test_padded_version_is_rejected_not_trimmed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new();
        let pipeline = Pipeline::new(&settings, &executor, &source, targets());

        for version in [" v2.0.0", "v2.0.0\n", "\tv2.0.0 "] {
            let err = pipeline.run_prod(&release(version)).await.unwrap_err();
            assert!(
                matches!(&err, ReleaseError::Usage(message) if message.contains("whitespace")),
                "{version:?} gave {err:?}"
            );
            assert_eq!(err.exit_code(), 2);
        }
        assert!(executor.actions().is_empty());
        assert_eq!(executor.session_region(), None);
    }

    #[tokio::test]
    async fn test_prod_success_tags_with_version_and_cleans_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor =
            FakeExecutor::new().with_local_images([format!("{HOST}/dev/a:dev-1111111")]);

        let report = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&release("v2.0.0"))
            .await
            .unwrap();

        assert_eq!(
            executor.pushed(),
            vec![format!("{HOST}/prod/a:v2.0.0"), format!("{HOST}/prod/b:v2.0.0")]
        );
        assert_eq!(executor.deployed(), vec!["a", "b"]);
        assert_eq!(
            executor.removed(),
            vec![
                format!("{HOST}/prod/a:v2.0.0"),
                format!("{HOST}/dev/a:dev-1111111"),
                format!("{HOST}/prod/b:v2.0.0"),
            ]
        );
        assert!(executor.local().is_empty());
        assert!(report.is_success());
        assert_eq!(report.cleanup.as_ref().map(|c| c.removed.len()), Some(3));
    }

    #[tokio::test]
    async fn test_no_cleanup_flag_keeps_local_images() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = FakeExecutor::new();

        let report = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&ProdOptions {
                no_cleanup: true,
                ..release("v2.0.0")
            })
            .await
            .unwrap();

        assert!(executor.removed().is_empty());
        assert!(report.cleanup.is_none());
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_prod_dry_run_is_pure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = workspace(temp_dir.path(), &["a", "b"]);
        let source = FakeSourceControl::new(temp_dir.path()).with_head("abcdef0123");
        let executor = DryRunExecutor::new();

        let report = Pipeline::new(&settings, &executor, &source, targets())
            .run_prod(&ProdOptions {
                dry_run: true,
                ..release("v2.0.0")
            })
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(report.cleanup.is_none());
        let actions = executor.actions();
        assert!(actions.iter().any(
            |a| matches!(a, Action::Push { reference } if reference == &format!("{HOST}/prod/b:v2.0.0"))
        ));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::RemoveImage { .. })));
        assert!(!temp_dir.path().join("locks").exists());
    }
}
