// Build module - building, tagging and pushing pipeline images
//
// Each image is built from its own directory with the context's build
// arguments, tagged with its fully qualified reference and pushed. Images can
// be processed by a bounded pool; results always come back in catalog order.

mod registry;

pub(crate) use registry::authenticate;

use futures::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::catalog::{Image, ImageName};
use crate::context::{EnvironmentContext, ImageRef};
use crate::error::{ReleaseError, Result};
use crate::exec::{BuildSpec, Executor};

/// What to do with the remaining images after one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and keep going (dev)
    Continue,
    /// Stop scheduling work and cancel in-flight builds (prod)
    Abort,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub image: ImageName,
    pub result: Result<ImageRef>,
}

pub struct Builder<'a> {
    context: &'a EnvironmentContext,
    executor: &'a dyn Executor,
}

impl<'a> Builder<'a> {
    pub fn new(context: &'a EnvironmentContext, executor: &'a dyn Executor) -> Self {
        Self { context, executor }
    }

    pub fn build_spec(&self, image: &Image) -> BuildSpec {
        BuildSpec {
            image: image.name.clone(),
            context_dir: image.dir.clone(),
            reference: self.context.reference(&image.name),
            build_args: self.context.build_args(),
        }
    }

    /// Build and push one image, returning the pushed reference.
    ///
    /// The reference is only returned once the push has completed.
    pub async fn build_and_push(&self, image: &Image) -> Result<ImageRef> {
        let spec = self.build_spec(image);

        self.executor
            .build(&spec)
            .await
            .map_err(|source| ReleaseError::Build {
                image: image.name.to_string(),
                source,
            })?;

        self.executor
            .push(&spec.reference)
            .await
            .map_err(|source| ReleaseError::Push {
                image: image.name.to_string(),
                source,
            })?;

        info!("✓ Pushed {}", spec.reference);
        Ok(spec.reference)
    }

    async fn build_with_retries(&self, image: &Image, retries: u32) -> Result<ImageRef> {
        let mut attempt = 0;
        loop {
            match self.build_and_push(image).await {
                Ok(reference) => return Ok(reference),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!("{}; retrying ({}/{})", e.full_message(), attempt, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Build and push `images` with at most `jobs` in flight.
    ///
    /// Under `FailurePolicy::Abort` the returned list ends at the first
    /// failure; images after it were never started or were cancelled.
    pub async fn build_all(
        &self,
        images: &[&Image],
        jobs: usize,
        retries: u32,
        policy: FailurePolicy,
    ) -> Vec<BuildOutcome> {
        info!(
            "Building {} image(s) with tag {} ({} at a time)",
            images.len(),
            self.context.tag(),
            jobs.max(1)
        );

        let mut results = stream::iter(images.iter().copied())
            .map(|image| {
                let span = info_span!("image", name = %image.name);
                async move {
                    let result = self.build_with_retries(image, retries).await;
                    BuildOutcome {
                        image: image.name.clone(),
                        result,
                    }
                }
                .instrument(span)
            })
            .buffered(jobs.max(1));

        let mut outcomes = Vec::with_capacity(images.len());
        while let Some(outcome) = results.next().await {
            let failed = match &outcome.result {
                Ok(_) => false,
                Err(e) => {
                    error!(image = %outcome.image, "{}", e.full_message());
                    true
                }
            };
            outcomes.push(outcome);

            if failed && policy == FailurePolicy::Abort {
                warn!("Aborting remaining builds");
                break;
            }
        }

        outcomes
    }
}
