use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::{ArtifactId, ChangeArtifact, ItemId, NewWorkItem, RemoteWorkItem, TrackerClient};
use crate::errors::TrackerError;

/// Bounded exponential backoff for transient tracker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based), honouring a server hint.
    pub fn delay_for(&self, attempt: u32, err: &TrackerError) -> Duration {
        if let TrackerError::RateLimited {
            retry_after: Some(hint),
        } = err
        {
            return (*hint).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wraps a tracker and retries transient failures within one call.
///
/// `create_item` is not idempotent, so it is only retried after a rate
/// limit, which the tracker reports before doing any work. A timeout or
/// server error on create surfaces immediately; reconciliation picks up an
/// item that was created anyway.
pub struct RetryingTracker<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: TrackerClient> RetryingTracker<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn with_retry<R, F, Fut>(
        &self,
        op: &'static str,
        retryable: fn(&TrackerError) -> bool,
        mut call: F,
    ) -> Result<R, TrackerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TrackerError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_attempts && retryable(&err) => {
                    let delay = self.policy.delay_for(attempt, &err);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient tracker failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn transient(err: &TrackerError) -> bool {
    err.is_transient()
}

fn rate_limited(err: &TrackerError) -> bool {
    matches!(err, TrackerError::RateLimited { .. })
}

#[async_trait]
impl<T: TrackerClient> TrackerClient for RetryingTracker<T> {
    async fn list_managed_items(&self, marker: &str) -> Result<Vec<RemoteWorkItem>, TrackerError> {
        self.with_retry("list_managed_items", transient, || {
            self.inner.list_managed_items(marker)
        })
        .await
    }

    async fn create_item(&self, item: &NewWorkItem) -> Result<RemoteWorkItem, TrackerError> {
        self.with_retry("create_item", rate_limited, || self.inner.create_item(item))
            .await
    }

    async fn list_artifacts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeArtifact>, TrackerError> {
        self.with_retry("list_artifacts_since", transient, || {
            self.inner.list_artifacts_since(since)
        })
        .await
    }

    async fn get_item(&self, id: &ItemId) -> Result<RemoteWorkItem, TrackerError> {
        self.with_retry("get_item", transient, || self.inner.get_item(id))
            .await
    }

    async fn closing_evidence(&self, id: &ItemId) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        self.with_retry("closing_evidence", transient, || self.inner.closing_evidence(id))
            .await
    }

    async fn get_artifact(&self, id: &ArtifactId) -> Result<ChangeArtifact, TrackerError> {
        self.with_retry("get_artifact", transient, || self.inner.get_artifact(id))
            .await
    }

    async fn ensure_labels(&self, labels: &[String]) -> Result<Vec<String>, TrackerError> {
        self.with_retry("ensure_labels", transient, || self.inner.ensure_labels(labels))
            .await
    }

    async fn whoami(&self) -> Result<String, TrackerError> {
        self.with_retry("whoami", transient, || self.inner.whoami())
            .await
    }
}
