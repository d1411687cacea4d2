// Dev pipeline: build what changed, deploy what built, keep going on failure

use tracing::{error, info, warn};

use super::report::{ImageOutcome, RunReport};
use super::{Pipeline, Stage, StageTracker};
use crate::build::{self, Builder, FailurePolicy};
use crate::changes::{select_build_set, ChangeDetector};
use crate::context::{Environment, EnvironmentContext};
use crate::deploy::Deployer;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct DevOptions {
    /// Skip change detection and rebuild every image
    pub all: bool,
    pub dry_run: bool,
    /// Reference branch override
    pub base: Option<String>,
    pub jobs: Option<usize>,
}

impl Pipeline<'_> {
    /// Run the dev pipeline.
    ///
    /// Per-image failures end up in the returned report; only failures that
    /// stop the whole run (configuration, catalog, registry, change
    /// detection, lease) are returned as errors.
    pub async fn run_dev(&self, options: &DevOptions) -> Result<RunReport> {
        let mut stages = StageTracker::new(Environment::Dev);
        let result = self.dev(options, &mut stages).await;
        if result.is_err() {
            stages.fail();
        }
        result
    }

    async fn dev(&self, options: &DevOptions, stages: &mut StageTracker) -> Result<RunReport> {
        let context = EnvironmentContext::load(
            self.settings,
            Environment::Dev,
            options.dry_run,
            None,
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

        let changes = if options.all {
            info!(
                "Rebuilding all {} image(s) under {}",
                catalog.len(),
                catalog.root().display()
            );
            None
        } else {
            let base = options
                .base
                .clone()
                .unwrap_or_else(|| self.settings.reference_branch.clone());
            let detector = ChangeDetector::new(self.source, base, &self.settings.shared_paths);
            Some(detector.scan().await?)
        };
        let selected = select_build_set(&catalog, changes.as_ref());
        stages.advance(Stage::SetSelected);

        let mut report = RunReport::new(&context);
        if selected.is_empty() {
            if let Some(changes) = &changes {
                info!("No image changed since {}; nothing to build", changes.base());
            }
            stages.advance(Stage::Done);
            report.stage = stages.current();
            return Ok(report);
        }

        let names: Vec<&str> = selected.iter().map(|image| image.name.as_str()).collect();
        match changes.as_ref().and_then(|c| c.shared_change()) {
            Some(path) => info!(
                "Selected {} image(s) because shared path {} changed",
                selected.len(),
                path.display()
            ),
            None => info!("Selected {} image(s): {}", selected.len(), names.join(", ")),
        }

        let builder = Builder::new(&context, self.executor);
        let outcomes = builder
            .build_all(
                &selected,
                self.jobs(options.jobs),
                self.settings.dev_retries,
                FailurePolicy::Continue,
            )
            .await;
        stages.advance(Stage::Built);

        for outcome in outcomes {
            let reference = match &outcome.result {
                Ok(reference) => reference,
                Err(e) => {
                    report.record(outcome.image.clone(), ImageOutcome::from_build_error(e));
                    continue;
                }
            };

            let result = match deployer.deploy(reference).await {
                Ok(function) => ImageOutcome::Deployed {
                    reference: reference.to_string(),
                    function,
                },
                Err(e) => {
                    let message = e.full_message();
                    error!(image = %outcome.image, "{}", message);
                    ImageOutcome::DeployFailed {
                        function: deployer.target(&outcome.image),
                        error: message,
                    }
                }
            };
            report.record(outcome.image, result);
        }
        stages.advance(Stage::Deployed);

        let failed = report.failed().len();
        if failed > 0 {
            warn!("{} of {} image(s) failed", failed, report.images.len());
        }
        stages.advance(Stage::Done);
        report.stage = stages.current();
        Ok(report)
    }
}
