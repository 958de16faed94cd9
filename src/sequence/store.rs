use glob::glob;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::index::parse_leading_index;
use crate::errors::StoreError;

/// A numbered work-item file as produced by the upstream conversion step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemFile {
    pub index: u32,
    pub slug: String,
    pub path: PathBuf,
    pub raw_content: String,
}

/// Ordered view over the numbered `*.md` files in the issues directory.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    dir: PathBuf,
    files: BTreeMap<u32, PathBuf>,
}

impl SequenceStore {
    /// Scan `dir` for numbered markdown files.
    ///
    /// Files without a leading index and later duplicates of an index are
    /// skipped with a warning. A missing directory yields an empty store.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let mut files = BTreeMap::new();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "issues directory does not exist");
            return Ok(Self {
                dir: dir.to_path_buf(),
                files,
            });
        }

        let pattern = format!(
            "{}/*.md",
            glob::Pattern::escape(&dir.display().to_string())
        );
        let mut paths: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| StoreError::Pattern(e.to_string()))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable issues directory entry");
                    None
                }
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping non UTF-8 filename");
                continue;
            };
            let Some(index) = parse_leading_index(name) else {
                warn!(file = name, "skipping file without a leading index");
                continue;
            };
            if let Some(existing) = files.get(&index) {
                warn!(
                    file = name,
                    index,
                    kept = %existing.display(),
                    "skipping duplicate index"
                );
                continue;
            }
            files.insert(index, path);
        }

        debug!(dir = %dir.display(), count = files.len(), "loaded work-item files");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All indices present, ascending.
    pub fn list_indices(&self) -> Vec<u32> {
        self.files.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Smallest index present in the store.
    pub fn first_index(&self) -> Option<u32> {
        self.files.keys().next().copied()
    }

    /// Smallest index strictly greater than `after`. Gaps are tolerated.
    pub fn next_index_after(&self, after: u32) -> Option<u32> {
        self.files
            .range(after.saturating_add(1)..)
            .next()
            .map(|(index, _)| *index)
            .filter(|index| *index > after)
    }

    /// Read the file for `index`.
    pub fn file_for(&self, index: u32) -> Result<WorkItemFile, StoreError> {
        let path = self
            .files
            .get(&index)
            .ok_or(StoreError::NotFound { index })?;
        let raw_content =
            std::fs::read_to_string(path).map_err(|source| StoreError::ReadFailed {
                path: path.clone(),
                source,
            })?;

        Ok(WorkItemFile {
            index,
            slug: slug_of(path),
            path: path.clone(),
            raw_content,
        })
    }

    /// Filename for `index` without reading it.
    pub fn path_for(&self, index: u32) -> Option<&Path> {
        self.files.get(&index).map(PathBuf::as_path)
    }
}

/// `007-add-caching.md` → `add-caching`.
fn slug_of(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}
