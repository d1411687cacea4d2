// Best-effort local disk cleanup after a successful prod release

use tracing::{info, warn};

use crate::catalog::ImageName;
use crate::context::{Environment, EnvironmentContext};
use crate::exec::Executor;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupSummary {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Cleanup<'a> {
    context: &'a EnvironmentContext,
    executor: &'a dyn Executor,
}

impl<'a> Cleanup<'a> {
    pub fn new(context: &'a EnvironmentContext, executor: &'a dyn Executor) -> Self {
        Self { context, executor }
    }

    /// Remove each released image's release-tagged copy and every local dev
    /// build of the same image. Failures are logged and never returned.
    pub async fn run(&self, released: &[ImageName]) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        for image in released {
            let release_ref = self.context.reference(image).to_string();
            self.remove(&release_ref, &mut summary).await;

            let dev_repository = self.context.repository(Environment::Dev, image);
            match self.executor.local_images(&dev_repository).await {
                Ok(references) => {
                    for reference in references {
                        self.remove(&reference, &mut summary).await;
                    }
                }
                Err(e) => {
                    warn!("Could not list local images of {}: {}", dev_repository, e);
                    summary.failed.push(format!("{}:*", dev_repository));
                }
            }
        }

        info!(
            "Cleanup removed {} local image(s), {} could not be removed",
            summary.removed.len(),
            summary.failed.len()
        );
        summary
    }

    async fn remove(&self, reference: &str, summary: &mut CleanupSummary) {
        match self.executor.remove_image(reference).await {
            Ok(()) => {
                info!("Removed local image {}", reference);
                summary.removed.push(reference.to_string());
            }
            Err(e) => {
                warn!("Could not remove local image {}: {}", reference, e);
                summary.failed.push(reference.to_string());
            }
        }
    }
}
