//! Source file discovery

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One file picked up for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    name: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base file name, e.g. `resource_8.bson.gz`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything before the first `.`, e.g. `resource_8`
    pub fn stem(&self) -> &str {
        self.name.split('.').next().unwrap_or_default()
    }

    /// Numeric id after the stem's last underscore (`resource_8` -> 8)
    pub fn resource_number(&self) -> Option<i64> {
        self.stem().rsplit_once('_')?.1.parse().ok()
    }

    /// Whether the file name ends in `.` followed by `extension`.
    ///
    /// The match is case-sensitive; a leading dot on `extension` is optional.
    pub fn has_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.name
            .strip_suffix(extension)
            .is_some_and(|rest| rest.ends_with('.'))
    }
}

/// Recursively collect files under `root` whose name ends with `extension`.
///
/// The result is sorted by path so that a re-run visits files, and writes
/// failures, in the same order.
pub fn discover_files(root: &Path, extension: &str) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file = SourceFile::new(entry.path());
        if file.has_extension(extension) {
            files.push(file);
        }
    }

    debug!(root = %root.display(), extension, count = files.len(), "Discovered source files");

    Ok(files)
}
