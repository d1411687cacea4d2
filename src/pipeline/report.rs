// End-of-run summary: one row per selected image

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use std::fmt;

use super::Stage;
use crate::catalog::ImageName;
use crate::cleanup::CleanupSummary;
use crate::context::{Environment, EnvironmentContext};
use crate::error::ReleaseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Deployed { reference: String, function: String },
    BuildFailed(String),
    PushFailed(String),
    DeployFailed { function: String, error: String },
}

impl ImageOutcome {
    /// Classify a build/push failure
    pub(crate) fn from_build_error(error: &ReleaseError) -> Self {
        let message = error.full_message();
        match error {
            ReleaseError::Push { .. } => ImageOutcome::PushFailed(message),
            _ => ImageOutcome::BuildFailed(message),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, ImageOutcome::Deployed { .. })
    }
}

impl fmt::Display for ImageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageOutcome::Deployed { .. } => write!(f, "deployed"),
            ImageOutcome::BuildFailed(_) => write!(f, "build failed"),
            ImageOutcome::PushFailed(_) => write!(f, "push failed"),
            ImageOutcome::DeployFailed { .. } => write!(f, "deploy failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub image: ImageName,
    pub outcome: ImageOutcome,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub environment: Environment,
    pub tag: String,
    pub dry_run: bool,
    pub images: Vec<ImageReport>,
    pub stage: Stage,
    pub cleanup: Option<CleanupSummary>,
}

impl RunReport {
    pub(crate) fn new(context: &EnvironmentContext) -> Self {
        Self {
            environment: context.environment,
            tag: context.tag().to_string(),
            dry_run: context.dry_run,
            images: Vec::new(),
            stage: Stage::Init,
            cleanup: None,
        }
    }

    pub(crate) fn record(&mut self, image: ImageName, outcome: ImageOutcome) {
        self.images.push(ImageReport { image, outcome });
    }

    pub fn failed(&self) -> Vec<&ImageName> {
        self.images
            .iter()
            .filter(|report| report.outcome.is_failure())
            .map(|report| &report.image)
            .collect()
    }

    pub fn deployed(&self) -> Vec<&ImageName> {
        self.images
            .iter()
            .filter(|report| !report.outcome.is_failure())
            .map(|report| &report.image)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done && self.failed().is_empty()
    }

    pub fn print_summary(&self) {
        if self.images.is_empty() {
            println!("No images were selected for {}.", self.environment);
            return;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("IMAGE").add_attribute(Attribute::Bold),
                Cell::new("RESULT").add_attribute(Attribute::Bold),
                Cell::new("FUNCTION").add_attribute(Attribute::Bold),
                Cell::new("DETAIL").add_attribute(Attribute::Bold),
            ]);

        for report in &self.images {
            let result = Cell::new(report.outcome.to_string()).fg(if report.outcome.is_failure() {
                Color::Red
            } else {
                Color::Green
            });
            let (function, detail) = match &report.outcome {
                ImageOutcome::Deployed {
                    reference,
                    function,
                } => (function.as_str(), reference.as_str()),
                ImageOutcome::BuildFailed(error) | ImageOutcome::PushFailed(error) => ("-", error.as_str()),
                ImageOutcome::DeployFailed { function, error } => (function.as_str(), error.as_str()),
            };
            table.add_row(vec![
                Cell::new(report.image.as_str()),
                result,
                Cell::new(function),
                Cell::new(detail),
            ]);
        }

        println!("{}", table);

        let failed = self.failed();
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        if failed.is_empty() {
            println!(
                "{}{} image(s) released to {} with tag {}",
                prefix,
                self.deployed().len(),
                self.environment,
                self.tag
            );
        } else {
            let names: Vec<&str> = failed.iter().map(|name| name.as_str()).collect();
            println!(
                "{}{} of {} image(s) failed: {}",
                prefix,
                failed.len(),
                self.images.len(),
                names.join(", ")
            );
        }

        if let Some(cleanup) = &self.cleanup {
            println!(
                "Cleanup removed {} local image(s) ({} could not be removed)",
                cleanup.removed.len(),
                cleanup.failed.len()
            );
        }
    }
}
