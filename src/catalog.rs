// Image catalog: the canonical set of buildable images under the pipeline root

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ReleaseError, Result};

/// Name of an image, taken from the base name of its source directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageName(String);

impl ImageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ImageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: ImageName,
    /// Directory holding the build descriptor; also the build context
    pub dir: PathBuf,
}

impl Image {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: ImageName::new(name),
            dir: dir.into(),
        }
    }
}

/// Ordered, collision-free set of images discovered once per invocation.
///
/// Images are sorted by name so that logs and build order are reproducible
/// across runs on the same tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    images: Vec<Image>,
}

impl Catalog {
    /// Build a catalog from already-located images.
    ///
    /// `images` is expected in discovery order; on a name collision the error
    /// names the earlier directory first.
    pub fn from_images(root: impl Into<PathBuf>, images: Vec<Image>, marker: &str) -> Result<Self> {
        let root = root.into();
        let mut by_name: BTreeMap<ImageName, Image> = BTreeMap::new();

        for image in images {
            if let Some(existing) = by_name.get(&image.name) {
                return Err(ReleaseError::NameCollision {
                    name: image.name.to_string(),
                    first: existing.dir.clone(),
                    second: image.dir,
                });
            }
            by_name.insert(image.name.clone(), image);
        }

        if by_name.is_empty() {
            return Err(ReleaseError::CatalogEmpty {
                root,
                marker: marker.to_string(),
            });
        }

        Ok(Self {
            root,
            images: by_name.into_values().collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Scan `root` for directories containing a `marker` file (e.g. `Dockerfile`).
///
/// Nested stage directories are found as well. Hidden directories are skipped,
/// and the root itself is never treated as an image.
pub fn discover(root: &Path, marker: &str) -> Result<Catalog> {
    info!("Discovering images under {}", root.display());

    let mut images = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        let entry = entry.map_err(|source| ReleaseError::Catalog {
            root: root.to_path_buf(),
            source,
        })?;

        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        if !entry.path().join(marker).is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        debug!("Found image '{}' in {}", name, entry.path().display());
        images.push(Image::new(name, entry.path()));
    }

    let catalog = Catalog::from_images(root, images, marker)?;
    info!("Discovered {} image(s)", catalog.len());
    Ok(catalog)
}
