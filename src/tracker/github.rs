use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
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

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Validate that a string looks like a valid GitHub token based on its prefix.
///
/// This performs a format check only; it does not verify the token is active
/// or has appropriate scopes.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Normalise a repository reference to `owner/repo`.
///
/// Accepts a bare slug or an HTTPS URL:
/// - `owner/repo`
/// - `https://github.com/owner/repo`
/// - `https://github.com/owner/repo.git`
pub fn parse_owner_repo(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let path = match reference.strip_prefix("https://") {
        Some(rest) => rest.split_once('/').map(|(_, path)| path)?,
        None => reference,
    };
    let path = path.strip_suffix(".git").unwrap_or(path);

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        Some(format!("{}/{}", parts[0], parts[1]))
    } else {
        None
    }
}

/// A GitHub issue (subset of fields).
#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub created_at: String,
    pub html_url: Option<String>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    /// Pull requests also come through the issues endpoint; filter them out.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// A GitHub pull request (subset of fields).
#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubPull {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub user: Option<GitHubUser>,
    pub state: String,
    pub created_at: String,
    pub merged_at: Option<String>,
}

/// One issue timeline entry. Only the fields used to find closing pull requests.
#[derive(Debug, Deserialize)]
struct TimelineEvent {
    event: Option<String>,
    commit_id: Option<String>,
    commit_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitPull {
    number: u64,
}

impl GitHubIssue {
    fn into_remote(self) -> Result<RemoteWorkItem, TrackerError> {
        let state = match self.state.as_str() {
            "open" => LifecycleState::Open,
            "closed" => LifecycleState::Closed,
            other => {
                return Err(TrackerError::Malformed(format!(
                    "issue #{} has unknown state '{}'",
                    self.number, other
                )));
            }
        };
        Ok(RemoteWorkItem {
            id: ItemId::new(self.number.to_string()),
            created_at: parse_timestamp("issue created_at", &self.created_at)?,
            title: self.title,
            state,
            closing_evidence: BTreeSet::new(),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            web_url: self.html_url,
        })
    }
}

impl GitHubPull {
    fn into_artifact(self) -> Result<ChangeArtifact, TrackerError> {
        let merge_state = match (self.state.as_str(), self.merged_at.is_some()) {
            (_, true) => MergeState::Merged,
            ("open", false) => MergeState::Open,
            ("closed", false) => MergeState::ClosedUnmerged,
            (other, _) => {
                return Err(TrackerError::Malformed(format!(
                    "pull request #{} has unknown state '{}'",
                    self.number, other
                )));
            }
        };
        Ok(ChangeArtifact {
            id: ArtifactId::new(self.number.to_string()),
            created_at: parse_timestamp("pull request created_at", &self.created_at)?,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            merge_state,
        })
    }
}

/// Six hex digits derived from the label name.
pub fn label_color(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest[..3].iter().map(|b| format!("{:02x}", b)).collect()
}

/// GitHub REST v3 adapter.
pub struct GitHubTracker {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    token: String,
    known_users: Mutex<HashSet<String>>,
}

impl GitHubTracker {
    pub fn new(
        api_url: &str,
        repository: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let repo = parse_owner_repo(repository).ok_or_else(|| {
            TrackerError::Rejected {
                status: 0,
                message: format!("'{}' is not an owner/repo reference", repository),
            }
        })?;
        Ok(Self {
            client: build_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo,
            token: token.to_string(),
            known_users: Mutex::new(HashSet::new()),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repo
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
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

    /// Fetch every page of a list endpoint. Stops on the first short page.
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

    /// Pull requests holding the commits that closed the issue.
    ///
    /// Only `closed` events with a commit count. Mentions and links from
    /// other issues or pull requests are not closings, and a commit from
    /// another repository says nothing about pull requests here.
    async fn closing_pulls(&self, number: &str) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        let path = format!("/repos/{}/issues/{}/timeline", self.repo, number);
        let events: Vec<TimelineEvent> = self.get_all(&path, &[]).await?;
        let local_commits = format!("/repos/{}/commits/", self.repo.to_lowercase());

        let mut evidence = BTreeSet::new();
        for event in events {
            if event.event.as_deref() != Some("closed") {
                continue;
            }
            let Some(sha) = event.commit_id else {
                continue;
            };
            if let Some(url) = &event.commit_url
                && !url.to_lowercase().contains(&local_commits)
            {
                debug!(issue = number, commit = %sha, url = %url, "closed from another repository");
                continue;
            }

            let path = format!("/repos/{}/commits/{}/pulls", self.repo, sha);
            match self.get_json::<Vec<CommitPull>>(&path, &[]).await {
                Ok(pulls) => {
                    evidence.extend(pulls.into_iter().map(|p| ArtifactId::new(p.number.to_string())))
                }
                Err(TrackerError::NotFound(_) | TrackerError::Rejected { status: 422, .. }) => {
                    warn!(issue = number, commit = %sha, "closing commit is unknown to this repository");
                }
                Err(e) => return Err(e),
            }
        }
        debug!(issue = number, count = evidence.len(), "timeline closing evidence");
        Ok(evidence)
    }

    /// Usernames that exist on GitHub; unknown ones are dropped with a warning.
    async fn valid_assignees(&self, usernames: &[String]) -> Vec<String> {
        let mut valid = Vec::new();
        for username in usernames {
            let cached = self
                .known_users
                .lock()
                .map(|users| users.contains(username))
                .unwrap_or(false);
            if cached {
                valid.push(username.clone());
                continue;
            }

            let path = format!("/users/{}", username);
            match self.get_json::<GitHubUser>(&path, &[]).await {
                Ok(user) => {
                    if let Ok(mut users) = self.known_users.lock() {
                        users.insert(user.login.clone());
                        users.insert(username.clone());
                    }
                    valid.push(username.clone());
                }
                Err(e) => warn!(user = %username, error = %e, "skipping unknown assignee"),
            }
        }
        valid
    }
}

#[async_trait]
impl TrackerClient for GitHubTracker {
    async fn list_managed_items(&self, marker: &str) -> Result<Vec<RemoteWorkItem>, TrackerError> {
        let path = format!("/repos/{}/issues", self.repo);
        let issues: Vec<GitHubIssue> = self
            .get_all(
                &path,
                &[
                    ("labels", marker.to_string()),
                    ("state", "all".to_string()),
                    ("sort", "created".to_string()),
                    ("direction", "asc".to_string()),
                ],
            )
            .await?;

        issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(GitHubIssue::into_remote)
            .collect()
    }

    async fn create_item(&self, item: &NewWorkItem) -> Result<RemoteWorkItem, TrackerError> {
        let assignees = self.valid_assignees(&item.assignees).await;
        let mut payload = json!({
            "title": item.title,
            "body": item.body,
            "labels": item.labels,
        });
        if !assignees.is_empty() {
            payload["assignees"] = json!(assignees);
        }

        let path = format!("/repos/{}/issues", self.repo);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&payload)
            .send()
            .await
            .map_err(send_error)?;
        let issue: GitHubIssue = decode(check_status(resp).await?, &path).await?;
        info!(issue = issue.number, url = issue.html_url.as_deref().unwrap_or(""), "created GitHub issue");
        issue.into_remote()
    }

    async fn list_artifacts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeArtifact>, TrackerError> {
        let path = format!("/repos/{}/pulls", self.repo);
        let mut artifacts = Vec::new();
        let mut page = 1u32;

        // Newest first, so stop once a page reaches past the cutoff.
        loop {
            let pulls: Vec<GitHubPull> = self
                .get_json(
                    &path,
                    &[
                        ("state", "all".to_string()),
                        ("sort", "created".to_string()),
                        ("direction", "desc".to_string()),
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let count = pulls.len();

            let mut reached_cutoff = false;
            for pull in pulls {
                let artifact = pull.into_artifact()?;
                if artifact.created_at < since {
                    reached_cutoff = true;
                    continue;
                }
                artifacts.push(artifact);
            }

            if count < PER_PAGE || reached_cutoff {
                break;
            }
            page += 1;
        }

        Ok(artifacts)
    }

    async fn get_item(&self, id: &ItemId) -> Result<RemoteWorkItem, TrackerError> {
        let path = format!("/repos/{}/issues/{}", self.repo, id.as_str());
        let issue: GitHubIssue = self.get_json(&path, &[]).await?;
        if issue.pull_request.is_some() {
            return Err(TrackerError::NotFound(format!("{} is a pull request", id)));
        }
        issue.into_remote()
    }

    async fn closing_evidence(&self, id: &ItemId) -> Result<BTreeSet<ArtifactId>, TrackerError> {
        self.closing_pulls(id.as_str()).await
    }

    async fn get_artifact(&self, id: &ArtifactId) -> Result<ChangeArtifact, TrackerError> {
        let path = format!("/repos/{}/pulls/{}", self.repo, id.as_str());
        let pull: GitHubPull = self.get_json(&path, &[]).await?;
        pull.into_artifact()
    }

    async fn ensure_labels(&self, labels: &[String]) -> Result<Vec<String>, TrackerError> {
        let path = format!("/repos/{}/labels", self.repo);
        let existing: HashMap<String, String> = match self.get_all::<GitHubLabel>(&path, &[]).await {
            Ok(found) => found
                .into_iter()
                .map(|l| (l.name.to_lowercase(), l.name))
                .collect(),
            Err(e) if e.is_permanent() => return Err(e),
            Err(e) => {
                warn!(error = %e, "could not fetch repository labels");
                HashMap::new()
            }
        };

        let mut resolved = Vec::new();
        for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if let Some(name) = existing.get(&label.to_lowercase()) {
                resolved.push(name.clone());
                continue;
            }

            let color = label_color(label);
            let payload = json!({
                "name": label,
                "color": color,
                "description": format!("Auto-generated label for {}", label),
            });
            let created = match self
                .request(reqwest::Method::POST, &path)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => check_status(resp).await.map(|_| ()),
                Err(e) => Err(send_error(e)),
            };
            match created {
                Ok(()) => info!(label, color = %color, "created label"),
                // Pass the label through anyway; issue creation may still accept it.
                Err(e) => warn!(label, error = %e, "could not create label"),
            }
            resolved.push(label.to_string());
        }
        Ok(resolved)
    }

    async fn whoami(&self) -> Result<String, TrackerError> {
        let user: GitHubUser = self.get_json("/user", &[]).await?;
        Ok(user.login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── is_valid_github_token ────────────────────────────────────────

    #[test]
    fn test_valid_personal_access_token_classic() {
        assert!(is_valid_github_token("ghp_abc123def456"));
    }

    #[test]
    fn test_valid_fine_grained_pat() {
        assert!(is_valid_github_token("github_pat_abc123def456"));
    }

    #[test]
    fn test_empty_token_is_invalid() {
        assert!(!is_valid_github_token(""));
    }

    #[test]
    fn test_wrong_prefix_is_invalid() {
        assert!(!is_valid_github_token("ghx_abc123"));
        assert!(!is_valid_github_token("GHP_abc123"));
        assert!(!is_valid_github_token(" ghp_abc123"));
    }

    // ── parse_owner_repo ─────────────────────────────────────────────

    #[test]
    fn test_parse_bare_slug() {
        assert_eq!(parse_owner_repo("owner/repo"), Some("owner/repo".to_string()));
    }

    #[test]
    fn test_parse_https_url_with_git_suffix() {
        assert_eq!(
            parse_owner_repo("https://github.com/owner/repo.git"),
            Some("owner/repo".to_string())
        );
    }

    #[test]
    fn test_parse_enterprise_url() {
        assert_eq!(
            parse_owner_repo("https://github.example.com/team/service"),
            Some("team/service".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(parse_owner_repo("owner"), None);
        assert_eq!(parse_owner_repo("https://github.com/owner"), None);
        assert_eq!(parse_owner_repo("owner/repo/extra"), None);
        assert_eq!(parse_owner_repo(""), None);
    }

    // ── payload validation ───────────────────────────────────────────

    #[test]
    fn test_issue_into_remote() {
        let json = r#"{
            "number": 42,
            "title": "001 Set up clean architecture",
            "state": "closed",
            "created_at": "2023-12-25T10:00:00Z",
            "html_url": "https://github.com/o/r/issues/42",
            "labels": [{"name": "auto-generated"}, {"name": "foundation"}]
        }"#;
        let issue: GitHubIssue = serde_json::from_str(json).unwrap();
        let item = issue.into_remote().unwrap();

        assert_eq!(item.id, ItemId::new("42"));
        assert_eq!(item.state, LifecycleState::Closed);
        assert_eq!(item.labels, vec!["auto-generated", "foundation"]);
        assert!(item.closing_evidence.is_empty());
    }

    #[test]
    fn test_issue_unknown_state_is_malformed() {
        let issue = GitHubIssue {
            number: 1,
            title: "001 x".into(),
            state: "archived".into(),
            created_at: "2023-12-25T10:00:00Z".into(),
            html_url: None,
            labels: Vec::new(),
            pull_request: None,
        };
        assert!(matches!(
            issue.into_remote(),
            Err(TrackerError::Malformed(_))
        ));
    }

    #[test]
    fn test_issue_missing_title_fails_to_decode() {
        let json = r#"{"number": 3, "state": "open", "created_at": "2023-12-25T10:00:00Z"}"#;
        assert!(serde_json::from_str::<GitHubIssue>(json).is_err());
    }

    #[test]
    fn test_pull_merge_states() {
        let pull = |state: &str, merged_at: Option<&str>| GitHubPull {
            number: 7,
            title: "Fix #42".into(),
            body: None,
            user: Some(GitHubUser {
                login: "copilot-swe-agent".into(),
            }),
            state: state.into(),
            created_at: "2023-12-25T11:00:00Z".into(),
            merged_at: merged_at.map(str::to_string),
        };

        let merged = pull("closed", Some("2023-12-26T09:00:00Z")).into_artifact().unwrap();
        assert_eq!(merged.merge_state, MergeState::Merged);
        assert_eq!(merged.body, "");
        assert_eq!(merged.author, "copilot-swe-agent");

        let abandoned = pull("closed", None).into_artifact().unwrap();
        assert_eq!(abandoned.merge_state, MergeState::ClosedUnmerged);

        let open = pull("open", None).into_artifact().unwrap();
        assert_eq!(open.merge_state, MergeState::Open);
    }

    #[test]
    fn test_pull_without_user_is_ghost() {
        let json = r#"{"number": 9, "title": "t", "body": "b", "user": null,
            "state": "open", "created_at": "2023-12-25T11:00:00Z", "merged_at": null}"#;
        let pull: GitHubPull = serde_json::from_str(json).unwrap();
        assert_eq!(pull.into_artifact().unwrap().author, "ghost");
    }

    #[test]
    fn test_label_color_is_stable_hex() {
        let color = label_color("foundation");
        assert_eq!(color.len(), 6);
        assert!(color.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(color, label_color("foundation"));
        assert_ne!(color, label_color("frontend"));
    }
}
