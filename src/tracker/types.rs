use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Integer ids in numeric order (`9` before `10`), ahead of any other id,
/// which keep text order. Equal numbers fall back to the text so the order
/// agrees with `Eq`.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Tracker-assigned work-item identifier (GitHub issue number, GitLab iid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(&self.0, &other.0)
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tracker-assigned change artifact identifier (pull/merge request number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

impl Ord for ArtifactId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(&self.0, &other.0)
    }
}

impl PartialOrd for ArtifactId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Open,
    Merged,
    ClosedUnmerged,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeState::Open => write!(f, "open"),
            MergeState::Merged => write!(f, "merged"),
            MergeState::ClosedUnmerged => write!(f, "closed (unmerged)"),
        }
    }
}

/// A work item as the tracker reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkItem {
    pub id: ItemId,
    pub title: String,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
    /// Artifacts the tracker itself records as having closed this item.
    /// Empty as listed; filled in when the item is investigated.
    pub closing_evidence: BTreeSet<ArtifactId>,
    pub labels: Vec<String>,
    pub web_url: Option<String>,
}

impl RemoteWorkItem {
    pub fn is_open(&self) -> bool {
        self.state == LifecycleState::Open
    }
}

/// A pull or merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeArtifact {
    pub id: ArtifactId,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub merge_state: MergeState,
}

/// Payload for creating a work item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewWorkItem {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
}

/// Parse an RFC 3339 timestamp from a tracker payload.
pub(crate) fn parse_timestamp(
    field: &str,
    raw: &str,
) -> Result<DateTime<Utc>, crate::errors::TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| crate::errors::TrackerError::Malformed(format!("{field} '{raw}': {e}")))
}
