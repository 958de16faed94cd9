//! Tracker client facade.
//!
//! `TrackerClient` is the only seam that touches the network. Vendor adapters
//! (`github`, `gitlab`) implement it against the REST APIs, `RetryingTracker`
//! adds bounded backoff for transient failures, and `MemoryTracker` is an
//! in-process fake for tests. Every adapter validates payloads into the typed
//! records in `types` before anything downstream sees them.

pub mod github;
pub mod gitlab;
mod http;
pub mod memory;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::errors::TrackerError;

pub use github::GitHubTracker;
pub use gitlab::GitLabTracker;
pub use memory::MemoryTracker;
pub use retry::{RetryPolicy, RetryingTracker};
pub use types::{
    ArtifactId, ChangeArtifact, ItemId, LifecycleState, MergeState, NewWorkItem, RemoteWorkItem,
};

/// Remote issue tracker capability used by the promotion engine.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// All items (open and closed) carrying the bot marker label.
    ///
    /// Listed items carry no `closing_evidence`; fetch it with
    /// [`TrackerClient::closing_evidence`] for the items that need judging.
    async fn list_managed_items(&self, marker: &str) -> Result<Vec<RemoteWorkItem>, TrackerError>;

    /// Create one work item. Called at most once per cycle.
    async fn create_item(&self, item: &NewWorkItem) -> Result<RemoteWorkItem, TrackerError>;

    /// Pull/merge requests created at or after `since`.
    async fn list_artifacts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeArtifact>, TrackerError>;

    async fn get_item(&self, id: &ItemId) -> Result<RemoteWorkItem, TrackerError>;

    /// Changes in this project that the tracker records as having closed `id`.
    async fn closing_evidence(&self, id: &ItemId) -> Result<BTreeSet<ArtifactId>, TrackerError>;

    /// One pull/merge request by id.
    async fn get_artifact(&self, id: &ArtifactId) -> Result<ChangeArtifact, TrackerError>;

    /// Label names to apply for `labels`, creating missing ones where the
    /// vendor requires it.
    async fn ensure_labels(&self, labels: &[String]) -> Result<Vec<String>, TrackerError>;

    /// Login behind the configured credentials.
    async fn whoami(&self) -> Result<String, TrackerError>;
}
