// Change detection for the dev path: which images differ from the reference branch

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{Catalog, Image};
use crate::error::{ReleaseError, Result};
use crate::git::SourceControl;

/// Outcome of one diff against the reference branch
#[derive(Debug, Clone)]
pub struct ChangeSet {
    base: String,
    /// Absolute paths of changed files
    changed: Vec<PathBuf>,
    /// First changed file under a shared path, if any
    shared_change: Option<PathBuf>,
}

impl ChangeSet {
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Whether any file under the image's directory changed.
    ///
    /// A change under a shared path counts as a change to every image.
    pub fn changed(&self, image: &Image) -> bool {
        if self.shared_change.is_some() {
            return true;
        }
        let dir = absolute(&image.dir);
        self.changed.iter().any(|file| file.starts_with(&dir))
    }

    pub fn shared_change(&self) -> Option<&Path> {
        self.shared_change.as_deref()
    }
}

pub struct ChangeDetector<'a> {
    source: &'a dyn SourceControl,
    base: String,
    shared_paths: &'a [PathBuf],
}

impl<'a> ChangeDetector<'a> {
    pub fn new(source: &'a dyn SourceControl, base: impl Into<String>, shared_paths: &'a [PathBuf]) -> Self {
        Self {
            source,
            base: base.into(),
            shared_paths,
        }
    }

    /// Compute the three-dot diff once; failures are surfaced, never defaulted
    pub async fn scan(&self) -> Result<ChangeSet> {
        info!("Detecting changes against {}", self.base);

        let to_error = |source| ReleaseError::ChangeDetection {
            base: self.base.clone(),
            source,
        };
        let toplevel = self.source.toplevel().await.map_err(to_error)?;
        let files = self.source.changed_files(&self.base).await.map_err(to_error)?;
        debug!("{} file(s) changed since {}", files.len(), self.base);

        let shared_change = files
            .iter()
            .find(|file| self.shared_paths.iter().any(|shared| file.starts_with(shared)))
            .cloned();
        if let Some(file) = &shared_change {
            info!(
                "Shared path changed ({}); treating every image as changed",
                file.display()
            );
        }

        let root = absolute(&toplevel);
        Ok(ChangeSet {
            base: self.base.clone(),
            changed: files.into_iter().map(|file| root.join(file)).collect(),
            shared_change,
        })
    }
}

/// Canonical absolute form of `path`, falling back to joining the current directory
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Select the build set in catalog order.
///
/// `None` means no detection was requested ("force all"): every image is selected.
pub fn select_build_set<'c>(catalog: &'c Catalog, changes: Option<&ChangeSet>) -> Vec<&'c Image> {
    match changes {
        None => catalog.iter().collect(),
        Some(changes) => catalog
            .iter()
            .filter(|image| {
                let changed = changes.changed(image);
                debug!(
                    image = %image.name,
                    changed = changed,
                    "Change detection result"
                );
                changed
            })
            .collect(),
    }
}
