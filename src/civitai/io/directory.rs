use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{trace, warn};
use url::Url;

use crate::civitai::query::{ModelId, ModelVersionId};

/// Extension of the annotation file written beside every image.
const ANNOTATION_EXTENSION: &str = "txt";

/// Suffix of the image while it is being written.
const PARTIAL_SUFFIX: &str = ".part";

/// Derives the local file name of a resource from the last segment of its URL path.
///
/// Returns `None` when the URL cannot be parsed or ends in a segment that is empty,
/// `.` or `..`.
pub(crate) fn resource_file_name(resource_url: &str) -> Option<String> {
    let url = Url::parse(resource_url).ok()?;
    let name = url.path_segments()?.next_back()?;
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// The directory a run writes into: `root/<model id>[/<version id>]`.
#[derive(Debug, Clone)]
pub(crate) struct DownloadTarget {
    directory: PathBuf,
}

impl DownloadTarget {
    pub(crate) fn new(root: &Path, model_id: &ModelId, model_version_id: Option<&ModelVersionId>) -> Self {
        let mut directory = root.join(model_id.as_str());
        if let Some(version) = model_version_id {
            directory.push(version.as_str());
        }
        Self { directory }
    }

    pub(crate) fn directory(&self) -> &Path {
        &self.directory
    }

    /// Creates the directory chain if it does not exist yet.
    pub(crate) fn ensure(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create download directory at {:?}", self.directory))?;
        Ok(())
    }

    /// Paths of the image and its annotation for a resource file name.
    pub(crate) fn artifact_paths(&self, file_name: &str) -> (PathBuf, PathBuf) {
        let image_path = self.directory.join(file_name);
        let stem = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let annotation_path = self
            .directory
            .join(format!("{}.{}", stem, ANNOTATION_EXTENSION));
        (image_path, annotation_path)
    }

    /// Whether the image for `file_name` is already on disk.
    pub(crate) fn contains(&self, file_name: &str) -> bool {
        self.directory.join(file_name).exists()
    }

    /// Writes an image and its annotation.
    ///
    /// The image is written under a temporary name and only renamed into place once
    /// the annotation exists, so an image on disk always has its annotation beside it.
    /// On failure nothing written by this call is left behind.
    pub(crate) fn save_artifact(&self, file_name: &str, content: &[u8], annotation: &str) -> io::Result<()> {
        let (image_path, annotation_path) = self.artifact_paths(file_name);
        let partial_path = self.directory.join(format!("{}{}", file_name, PARTIAL_SUFFIX));

        if let Err(err) = fs::write(&partial_path, content) {
            remove_quietly(&partial_path);
            return Err(err);
        }
        trace!("Wrote {} bytes to {}", content.len(), partial_path.display());

        if let Err(err) = fs::write(&annotation_path, annotation) {
            remove_quietly(&annotation_path);
            remove_quietly(&partial_path);
            return Err(err);
        }

        if let Err(err) = fs::rename(&partial_path, &image_path) {
            remove_quietly(&annotation_path);
            remove_quietly(&partial_path);
            return Err(err);
        }

        Ok(())
    }
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Failed to clean up {}: {}", path.display(), err);
        }
    }
}
