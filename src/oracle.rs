//! Completion judgment for a promoted work item.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::correlator::{Correlator, Verdict};
use crate::errors::TrackerError;
use crate::tracker::{LifecycleState, MergeState, RemoteWorkItem, TrackerClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    NotDone,
    Done,
    /// Closed, but the evidence says the work did not land. Needs a human.
    Blocked,
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Judgment::NotDone => write!(f, "not done"),
            Judgment::Done => write!(f, "done"),
            Judgment::Blocked => write!(f, "blocked"),
        }
    }
}

/// How to treat an item closed without any linked change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualClosePolicy {
    /// A manual close counts as done.
    #[default]
    Trust,
    /// A manual close is held for review.
    Review,
}

impl fmt::Display for ManualClosePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualClosePolicy::Trust => write!(f, "trust"),
            ManualClosePolicy::Review => write!(f, "review"),
        }
    }
}

/// Decision table over lifecycle state and correlator verdict.
pub fn judge(state: LifecycleState, verdict: &Verdict, policy: ManualClosePolicy) -> Judgment {
    match (state, verdict) {
        (LifecycleState::Open, _) => Judgment::NotDone,
        (LifecycleState::Closed, Verdict::NoEvidence) => match policy {
            ManualClosePolicy::Trust => Judgment::Done,
            ManualClosePolicy::Review => Judgment::Blocked,
        },
        (LifecycleState::Closed, Verdict::Evidence { artifact, .. }) => {
            if artifact.merge_state == MergeState::Merged {
                Judgment::Done
            } else {
                Judgment::Blocked
            }
        }
    }
}

/// Correlate and judge a live item. Open items are judged without fetching
/// any artifacts.
pub async fn assess(
    tracker: &dyn TrackerClient,
    correlator: &Correlator,
    policy: ManualClosePolicy,
    item: &RemoteWorkItem,
) -> Result<(Judgment, Verdict), TrackerError> {
    if item.is_open() {
        return Ok((Judgment::NotDone, Verdict::NoEvidence));
    }
    let verdict = correlator.investigate(tracker, item).await?;
    let judgment = judge(item.state, &verdict, policy);
    debug!(item = %item.id, %judgment, "assessed item");
    Ok((judgment, verdict))
}
