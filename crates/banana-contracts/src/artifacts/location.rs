use std::path::{Path, PathBuf};

use crate::request::GenerationRequest;

/// Folder used when saving next to the source has no source to follow.
pub const DEFAULT_SAVE_FOLDER: &str = "banana";

/// Where a batch writes its results. Reconciliation scans the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveLocation {
    /// The directory of the first reference image, or `fallback` when the
    /// request carries none.
    NextToSource { fallback: PathBuf },
    Folder(PathBuf),
}

impl Default for SaveLocation {
    fn default() -> Self {
        Self::NextToSource {
            fallback: PathBuf::from(DEFAULT_SAVE_FOLDER),
        }
    }
}

impl SaveLocation {
    pub fn resolve(&self, first_source: Option<&Path>) -> PathBuf {
        match self {
            Self::Folder(dir) => dir.clone(),
            Self::NextToSource { fallback } => match first_source {
                // A bare file name has an empty parent: it lives in the cwd.
                Some(source) => match source.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                },
                None => fallback.clone(),
            },
        }
    }

    pub fn for_request(&self, request: &GenerationRequest) -> PathBuf {
        self.resolve(request.image_refs().first().map(PathBuf::as_path))
    }
}
