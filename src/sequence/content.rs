//! Derive the remote item (title, body, labels) from a work-item file.

use regex::Regex;
use std::sync::LazyLock;

use super::index::parse_leading_index;
use super::store::WorkItemFile;
use crate::errors::StoreError;

static LABELS_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#+\s*labels?\s*$").unwrap());

/// Title, body and file-declared labels for one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemContent {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

impl ItemContent {
    /// Build the content for `file`.
    ///
    /// The first non-empty line is the title, stripped of markdown heading
    /// markers; the rest is the body. The title always starts with the file
    /// index so reconciliation can map the remote item back to its file.
    pub fn from_file(file: &WorkItemFile) -> Result<Self, StoreError> {
        let mut lines = file.raw_content.lines();
        let title_line = lines
            .by_ref()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| StoreError::EmptyWorkItem {
                path: file.path.clone(),
            })?;

        let title = title_line.trim_start_matches('#').trim();
        if title.is_empty() {
            return Err(StoreError::EmptyWorkItem {
                path: file.path.clone(),
            });
        }

        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

        Ok(Self {
            title: indexed_title(file.index, title),
            body,
            labels: parse_labels(&file.raw_content),
        })
    }
}

/// Prefix `title` with the zero-padded index unless it already carries it.
pub fn indexed_title(index: u32, title: &str) -> String {
    if parse_leading_index(title) == Some(index) {
        title.to_string()
    } else {
        format!("{:03} {}", index, title)
    }
}

/// Parse labels from a `## Labels` section.
///
/// The first non-empty line after the heading is split on commas. The section
/// ends at the next heading.
pub fn parse_labels(content: &str) -> Vec<String> {
    let mut in_section = false;

    for line in content.lines() {
        let line = line.trim();

        if LABELS_HEADING.is_match(line) {
            in_section = true;
            continue;
        }
        if !in_section || line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            break;
        }

        return line
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty() && !label.starts_with('#'))
            .map(str::to_string)
            .collect();
    }

    Vec::new()
}
