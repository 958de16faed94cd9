use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::{build_client, check_status, decode, send_error};
use super::types::parse_timestamp;
use super::{
    ArtifactId, ChangeArtifact, ItemId, LifecycleState, MergeState, NewWorkItem, RemoteWorkItem,
    TrackerClient,
};
use crate::errors::TrackerError;

pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";
const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct GitLabIssue {
    iid: u64,
    title: String,
    state: String,
    created_at: String,
    web_url: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    project_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequest {
    iid: u64,
    title: String,
    description: Option<String>,
    author: Option<GitLabUser>,
    state: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    id: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ClosedByRef {
    iid: u64,
    project_id: Option<u64>,
}

impl GitLabIssue {
    fn into_remote(self) -> Result<RemoteWorkItem, TrackerError> {
        let state = match self.state.as_str() {
            "opened" | "reopened" => LifecycleState::Open,
            "closed" => LifecycleState::Closed,
            other => {
                return Err(TrackerError::Malformed(format!(
                    "issue #{} has unknown state '{}'",
                    self.iid, other
                )));
            }
        };
        Ok(RemoteWorkItem {
            id: ItemId::new(self.iid.to_string()),
            created_at: parse_timestamp("issue created_at", &self.created_at)?,
            title: self.title,
            state,
            closing_evidence: BTreeSet::new(),
            labels: self.labels,
            web_url: self.web_url,
        })
    }
}

impl GitLabMergeRequest {
    fn into_artifact(self) -> Result<ChangeArtifact, TrackerError> {
        let merge_state = match self.state.as_str() {
            "merged" => MergeState::Merged,
            "opened" | "locked" => MergeState::Open,
            "closed" => MergeState::ClosedUnmerged,
            other => {
                return Err(TrackerError::Malformed(format!(
                    "merge request !{} has unknown state '{}'",
                    self.iid, other
                )));
            }
        };
        Ok(ChangeArtifact {
            id: ArtifactId::new(self.iid.to_string()),
            created_at: parse_timestamp("merge request created_at", &self.created_at)?,
            title: self.title,
            body: self.description.unwrap_or_default(),
            author: self.author.map(|a| a.username).unwrap_or_default(),
            merge_state,
        })
    }
}

/// Encode a numeric id or `group/project` path for use in a URL segment.
fn encode_project(project: &str) -> String {
    project.trim().replace('/', "%2F")
}

/// GitLab REST v4 adapter.
pub struct GitLabTracker {
    client: reqwest::Client,
    api_base: String,
    project: String,
    token: String,
    user_ids: Mutex<HashMap<String, u64>>,
}

impl GitLabTracker {
    pub fn new(
        url: &str,
        project: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_base: format!("{}/api/v4", url.trim_end_matches('/')),
            project: encode_project(project),
            token: token.to_string(),
            user_ids: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TrackerError> {
        let resp = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await
            .map_err(send_error)?;
        decode(check_status(resp).await?, path).await
    }

    async fn get_all<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, TrackerError> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let mut params = query.to_vec();
            params.push(("per_page", PER_PAGE.to_string()));
            params.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(path, &params).await?;
            let count = batch.len();
            all.extend(batch);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    /// Merge requests in the issue's own project that GitLab records as
    /// having closed it. Merge request iids are per project, so closings
    /// from other projects are dropped.
    async fn closed_by(&self, iid: &str) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        let issue_path = format!("/projects/{}/issues/{}", self.project, iid);
        let issue: GitLabIssue = self.get_json(&issue_path, &[]).await?;

        let path = format!("{}/closed_by", issue_path);
        let refs: Vec<ClosedByRef> = self.get_json(&path, &[]).await?;
        let evidence: BTreeSet<ArtifactId> = refs
            .into_iter()
            .filter(|r| match (r.project_id, issue.project_id) {
                (Some(theirs), Some(ours)) => theirs == ours,
                _ => true,
            })
            .map(|r| ArtifactId::new(r.iid.to_string()))
            .collect();
        debug!(issue = iid, count = evidence.len(), "closed_by evidence");
        Ok(evidence)
    }

    /// Resolve usernames to user ids. Unknown users are skipped with a warning.
    async fn assignee_ids(&self, usernames: &[String]) -> Vec<u64> {
        let mut ids = Vec::new();
        for username in usernames {
            let cached = self
                .user_ids
                .lock()
                .ok()
                .and_then(|cache| cache.get(username).copied());
            if let Some(id) = cached {
                ids.push(id);
                continue;
            }

            match self
                .get_json::<Vec<GitLabUser>>("/users", &[("username", username.clone())])
                .await
            {
                Ok(users) => match users.first() {
                    Some(user) => {
                        debug!(user = %username, id = user.id, "resolved assignee");
                        if let Ok(mut cache) = self.user_ids.lock() {
                            cache.insert(username.clone(), user.id);
                        }
                        ids.push(user.id);
                    }
                    None => warn!(user = %username, "assignee not found"),
                },
                Err(e) => warn!(user = %username, error = %e, "failed to look up assignee"),
            }
        }
        ids
    }
}

#[async_trait]
impl TrackerClient for GitLabTracker {
    async fn list_managed_items(&self, marker: &str) -> Result<Vec<RemoteWorkItem>, TrackerError> {
        let path = format!("/projects/{}/issues", self.project);
        let issues: Vec<GitLabIssue> = self
            .get_all(
                &path,
                &[
                    ("labels", marker.to_string()),
                    ("scope", "all".to_string()),
                    ("state", "all".to_string()),
                    ("order_by", "created_at".to_string()),
                    ("sort", "asc".to_string()),
                ],
            )
            .await?;

        issues
            .into_iter()
            .map(GitLabIssue::into_remote)
            .collect()
    }

    async fn create_item(&self, item: &NewWorkItem) -> Result<RemoteWorkItem, TrackerError> {
        let mut payload = json!({
            "title": item.title,
            "description": item.body,
            "labels": item.labels.join(","),
        });
        let assignee_ids = self.assignee_ids(&item.assignees).await;
        if !assignee_ids.is_empty() {
            payload["assignee_ids"] = json!(assignee_ids);
        }

        let path = format!("/projects/{}/issues", self.project);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&payload)
            .send()
            .await
            .map_err(send_error)?;
        let issue: GitLabIssue = decode(check_status(resp).await?, &path).await?;
        info!(issue = issue.iid, url = issue.web_url.as_deref().unwrap_or(""), "created GitLab issue");
        issue.into_remote()
    }

    async fn list_artifacts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeArtifact>, TrackerError> {
        let path = format!("/projects/{}/merge_requests", self.project);
        let requests: Vec<GitLabMergeRequest> = self
            .get_all(
                &path,
                &[
                    ("state", "all".to_string()),
                    ("scope", "all".to_string()),
                    ("created_after", since.to_rfc3339()),
                    ("order_by", "created_at".to_string()),
                    ("sort", "asc".to_string()),
                ],
            )
            .await?;

        let mut artifacts = Vec::with_capacity(requests.len());
        for mr in requests {
            let artifact = mr.into_artifact()?;
            // created_after is exclusive on some GitLab versions; the cutoff here is inclusive.
            if artifact.created_at >= since {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }

    async fn get_item(&self, id: &ItemId) -> Result<RemoteWorkItem, TrackerError> {
        let path = format!("/projects/{}/issues/{}", self.project, id.as_str());
        let issue: GitLabIssue = self.get_json(&path, &[]).await?;
        issue.into_remote()
    }

    async fn closing_evidence(&self, id: &ItemId) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        self.closed_by(id.as_str()).await
    }

    async fn get_artifact(&self, id: &ArtifactId) -> Result<ChangeArtifact, TrackerError> {
        let path = format!("/projects/{}/merge_requests/{}", self.project, id.as_str());
        let mr: GitLabMergeRequest = self.get_json(&path, &[]).await?;
        mr.into_artifact()
    }

    /// GitLab creates unknown labels on first use.
    async fn ensure_labels(&self, labels: &[String]) -> Result<Vec<String>, TrackerError> {
        Ok(labels
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn whoami(&self) -> Result<String, TrackerError> {
        let user: GitLabUser = self.get_json("/user", &[]).await?;
        Ok(user.username)
    }
}
