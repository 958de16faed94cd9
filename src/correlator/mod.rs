//! Evidence correlation.
//!
//! Links a closed work item to the pull/merge request that most likely
//! closed it. Four strategies run in strict priority order and the first one
//! with any candidate wins:
//!
//! 1. Direct reference: tracker-recorded closing evidence, `#id`, or a
//!    closing keyword followed by the id
//! 2. Marker and authorship: an in-progress marker on an automation-authored
//!    artifact
//! 3. Temporal: automation-authored within the window after the item was
//!    created
//! 4. Sequence number: the item's embedded file index as a standalone number
//!
//! Within a strategy the earliest-created artifact wins, then the lowest id
//! (numeric ids compare by value).

pub mod patterns;

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::{debug, warn};

use crate::errors::TrackerError;
use crate::sequence::parse_leading_index;
use crate::tracker::{ChangeArtifact, RemoteWorkItem, TrackerClient};

/// Default automation identities: the Copilot coding agent as GitHub reports it.
pub const DEFAULT_AUTOMATION_AUTHORS: &[&str] =
    &["Copilot", "copilot-swe-agent", "copilot-swe-agent[bot]"];

pub const DEFAULT_IN_PROGRESS_MARKERS: &[&str] = &["[WIP]", "WIP:", "Draft:"];

pub const DEFAULT_TEMPORAL_WINDOW_HOURS: i64 = 24;

/// Who counts as automation and what marks its work in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationConfig {
    pub automation_authors: Vec<String>,
    pub in_progress_markers: Vec<String>,
    pub temporal_window: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            automation_authors: DEFAULT_AUTOMATION_AUTHORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            in_progress_markers: DEFAULT_IN_PROGRESS_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            temporal_window: Duration::hours(DEFAULT_TEMPORAL_WINDOW_HOURS),
        }
    }
}

impl CorrelationConfig {
    fn is_automation(&self, author: &str) -> bool {
        self.automation_authors
            .iter()
            .any(|a| a.eq_ignore_ascii_case(author))
    }
}

/// Which heuristic produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
    DirectReference,
    MarkerAndAuthor,
    Temporal,
    SequenceNumber,
}

impl Strategy {
    /// All strategies, strongest first.
    pub const ORDER: [Strategy; 4] = [
        Strategy::DirectReference,
        Strategy::MarkerAndAuthor,
        Strategy::Temporal,
        Strategy::SequenceNumber,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::DirectReference => "direct-reference",
            Strategy::MarkerAndAuthor => "marker-and-author",
            Strategy::Temporal => "temporal",
            Strategy::SequenceNumber => "sequence-number",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Evidence {
        artifact: ChangeArtifact,
        strategy: Strategy,
    },
    /// No artifact could be linked. For a closed item this means a manual close.
    NoEvidence,
}

impl Verdict {
    pub fn artifact(&self) -> Option<&ChangeArtifact> {
        match self {
            Verdict::Evidence { artifact, .. } => Some(artifact),
            Verdict::NoEvidence => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Correlator {
    config: CorrelationConfig,
}

impl Correlator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Pick the best closing evidence for `item` among `artifacts`.
    ///
    /// Only artifacts created at or after the item count, except ones the
    /// tracker recorded as closing it, which may predate it.
    pub fn correlate(&self, item: &RemoteWorkItem, artifacts: &[ChangeArtifact]) -> Verdict {
        for strategy in Strategy::ORDER {
            let best = artifacts
                .iter()
                .filter(|a| in_pool(strategy, item, a))
                .filter(|a| self.matches(strategy, item, a))
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            if let Some(artifact) = best {
                debug!(
                    item = %item.id,
                    artifact = %artifact.id,
                    %strategy,
                    merge_state = %artifact.merge_state,
                    "correlated closing evidence"
                );
                return Verdict::Evidence {
                    artifact: artifact.clone(),
                    strategy,
                };
            }
        }

        debug!(item = %item.id, candidates = artifacts.len(), "no closing evidence");
        Verdict::NoEvidence
    }

    fn matches(&self, strategy: Strategy, item: &RemoteWorkItem, artifact: &ChangeArtifact) -> bool {
        let text = || format!("{}\n{}", artifact.title, artifact.body);
        match strategy {
            Strategy::DirectReference => {
                item.closing_evidence.contains(&artifact.id)
                    || patterns::references_item(&text(), item.id.as_str())
            }
            Strategy::MarkerAndAuthor => {
                self.config.is_automation(&artifact.author)
                    && patterns::has_marker(&text(), &self.config.in_progress_markers)
            }
            Strategy::Temporal => {
                self.config.is_automation(&artifact.author)
                    && within(item.created_at, artifact.created_at, self.config.temporal_window)
            }
            Strategy::SequenceNumber => parse_leading_index(&item.title)
                .is_some_and(|index| patterns::mentions_index(&text(), index)),
        }
    }

    /// Fetch candidate artifacts for `item` and correlate them.
    ///
    /// Tracker-recorded closing evidence is only fetched for closed items,
    /// and recorded artifacts older than the item are fetched one by one.
    pub async fn investigate(
        &self,
        tracker: &dyn TrackerClient,
        item: &RemoteWorkItem,
    ) -> Result<Verdict, TrackerError> {
        let mut item = item.clone();
        if !item.is_open() {
            item.closing_evidence
                .extend(tracker.closing_evidence(&item.id).await?);
        }

        let mut artifacts = tracker.list_artifacts_since(item.created_at).await?;
        for id in &item.closing_evidence {
            if artifacts.iter().any(|a| &a.id == id) {
                continue;
            }
            match tracker.get_artifact(id).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(TrackerError::NotFound(_)) => {
                    warn!(item = %item.id, artifact = %id, "recorded closing change not found")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.correlate(&item, &artifacts))
    }
}

fn in_pool(strategy: Strategy, item: &RemoteWorkItem, artifact: &ChangeArtifact) -> bool {
    artifact.created_at >= item.created_at
        || (strategy == Strategy::DirectReference && item.closing_evidence.contains(&artifact.id))
}

fn within(start: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> bool {
    at >= start && at - start <= window
}
