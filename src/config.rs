//! Configuration for the promoter.
//!
//! Settings are read from `.promoter/promoter.toml` and layered
//! (file → environment → CLI). Tokens are never stored in the file; they come
//! only from `GITHUB_TOKEN` or `GITLAB_TOKEN`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [tracker]
//! provider = "github"
//! repository = "acme/widgets"
//! timeout_secs = 30
//!
//! [queue]
//! issues_dir = "issues"
//! marker_label = "auto-generated"
//! assignees = ["octocat"]
//! automation_assignee = "Copilot"
//!
//! [correlation]
//! automation_authors = ["Copilot", "copilot-swe-agent[bot]"]
//! in_progress_markers = ["[WIP]"]
//! temporal_window_hours = 24
//!
//! [completion]
//! manual_close = "trust"
//!
//! [poll]
//! interval_secs = 900
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::controller::ControllerSettings;
use crate::correlator::{
    CorrelationConfig, DEFAULT_AUTOMATION_AUTHORS, DEFAULT_IN_PROGRESS_MARKERS,
    DEFAULT_TEMPORAL_WINDOW_HOURS,
};
use crate::oracle::ManualClosePolicy;
use crate::tracker::github::{DEFAULT_GITHUB_API_URL, is_valid_github_token, parse_owner_repo};
use crate::tracker::gitlab::DEFAULT_GITLAB_URL;
use crate::tracker::{GitHubTracker, GitLabTracker, RetryPolicy, RetryingTracker, TrackerClient};

pub const PROMOTER_DIR: &str = ".promoter";
pub const CONFIG_FILE: &str = "promoter.toml";

/// Which tracker hosts the managed items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    GitHub,
    GitLab,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::GitHub => write!(f, "github"),
            Provider::GitLab => write!(f, "gitlab"),
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(Provider::GitHub),
            "gitlab" => Ok(Provider::GitLab),
            _ => bail!("Invalid tracker provider: {} (expected github or gitlab)", s),
        }
    }
}

impl Provider {
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Provider::GitHub => DEFAULT_GITHUB_API_URL,
            Provider::GitLab => DEFAULT_GITLAB_URL,
        }
    }

    /// Environment variable holding the access token.
    pub fn token_var(&self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB_TOKEN",
            Provider::GitLab => "GITLAB_TOKEN",
        }
    }

    fn url_var(&self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB_URL",
            Provider::GitLab => "GITLAB_URL",
        }
    }
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerSection {
    pub provider: Provider,
    /// Overrides the provider's public endpoint (enterprise installs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// GitHub `owner/repo`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// GitLab numeric id or `group/project` path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_url: None,
            repository: None,
            project_id: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueSection {
    /// Directory of numbered work-item files, relative to the project.
    #[serde(default = "default_issues_dir")]
    pub issues_dir: PathBuf,
    #[serde(default = "default_marker_label")]
    pub marker_label: String,
    pub assignees: Vec<String>,
    /// Coding-agent account added to every created item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_assignee: Option<String>,
}

fn default_issues_dir() -> PathBuf {
    PathBuf::from("issues")
}

fn default_marker_label() -> String {
    "auto-generated".to_string()
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            issues_dir: default_issues_dir(),
            marker_label: default_marker_label(),
            assignees: Vec::new(),
            automation_assignee: None,
        }
    }
}

/// `[correlation]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorrelationSection {
    #[serde(default = "default_automation_authors")]
    pub automation_authors: Vec<String>,
    #[serde(default = "default_in_progress_markers")]
    pub in_progress_markers: Vec<String>,
    #[serde(default = "default_temporal_window_hours")]
    pub temporal_window_hours: i64,
}

fn default_automation_authors() -> Vec<String> {
    DEFAULT_AUTOMATION_AUTHORS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_in_progress_markers() -> Vec<String> {
    DEFAULT_IN_PROGRESS_MARKERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_temporal_window_hours() -> i64 {
    DEFAULT_TEMPORAL_WINDOW_HOURS
}

impl CorrelationSection {
    /// The configured window, at least one hour. `None` when the hour count
    /// is too large to represent.
    pub fn temporal_window(&self) -> Option<chrono::TimeDelta> {
        chrono::TimeDelta::try_hours(self.temporal_window_hours.max(1))
    }
}

impl Default for CorrelationSection {
    fn default() -> Self {
        Self {
            automation_authors: default_automation_authors(),
            in_progress_markers: default_in_progress_markers(),
            temporal_window_hours: default_temporal_window_hours(),
        }
    }
}

/// `[completion]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionSection {
    pub manual_close: ManualClosePolicy,
}

/// `[poll]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    900
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Contents of `promoter.toml`. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromoterToml {
    pub tracker: TrackerSection,
    pub queue: QueueSection,
    pub correlation: CorrelationSection,
    pub completion: CompletionSection,
    pub poll: PollSection,
    pub retry: RetrySection,
}

impl PromoterToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse promoter.toml")
    }

    /// Load `promoter.toml` from `promoter_dir`, or defaults if absent.
    pub fn load_or_default(promoter_dir: &Path) -> Result<Self> {
        let config_path = promoter_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize promoter.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Problems in the file itself; empty when the file is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.queue.marker_label.trim().is_empty() {
            warnings.push("queue.marker_label must not be empty".to_string());
        }
        if self.poll.interval_secs == 0 {
            warnings.push("poll.interval_secs is 0; watch would spin without pause".to_string());
        }
        if self.tracker.timeout_secs == 0 {
            warnings.push("tracker.timeout_secs must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.correlation.temporal_window_hours <= 0 {
            warnings.push(format!(
                "correlation.temporal_window_hours must be positive, got {}",
                self.correlation.temporal_window_hours
            ));
        } else if self.correlation.temporal_window().is_none() {
            warnings.push(format!(
                "correlation.temporal_window_hours {} is out of range; using {}",
                self.correlation.temporal_window_hours, DEFAULT_TEMPORAL_WINDOW_HOURS
            ));
        }
        if self.correlation.automation_authors.is_empty() {
            warnings.push(
                "correlation.automation_authors is empty; only direct references and sequence numbers will link changes"
                    .to_string(),
            );
        }
        if self.tracker.provider == Provider::GitHub
            && let Some(repo) = &self.tracker.repository
            && parse_owner_repo(repo).is_none()
        {
            warnings.push(format!(
                "tracker.repository '{}' is not an owner/repo reference",
                repo
            ));
        }

        warnings
    }
}

/// Resolved configuration: `promoter.toml` with environment overrides applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub promoter_dir: PathBuf,
    pub toml: PromoterToml,
    token: Option<String>,
    env_warnings: Vec<String>,
}

impl Config {
    /// Load from the project directory using the process environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let promoter_dir = project_dir.join(PROMOTER_DIR);
        let toml = PromoterToml::load_or_default(&promoter_dir)?;
        Ok(Self::resolve(project_dir, toml, |key| std::env::var(key).ok()))
    }

    /// Apply environment overrides from `env` on top of `toml`.
    pub fn resolve(
        project_dir: PathBuf,
        mut toml: PromoterToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut env_warnings = Vec::new();

        if let Some(value) = lookup("TRACKER") {
            match value.parse::<Provider>() {
                Ok(provider) => toml.tracker.provider = provider,
                Err(e) => env_warnings.push(format!("TRACKER ignored: {}", e)),
            }
        }
        let provider = toml.tracker.provider;

        if let Some(url) = lookup(provider.url_var()) {
            toml.tracker.api_url = Some(url);
        }
        match (lookup("REPO_OWNER"), lookup("REPO_NAME")) {
            (Some(owner), Some(name)) => {
                toml.tracker.repository = Some(format!("{}/{}", owner.trim(), name.trim()));
            }
            (Some(_), None) | (None, Some(_)) => {
                env_warnings.push("REPO_OWNER and REPO_NAME must be set together".to_string());
            }
            (None, None) => {}
        }
        if let Some(project) = lookup("PROJECT_ID") {
            toml.tracker.project_id = Some(project.trim().to_string());
        }
        if let Some(label) = lookup("LABEL") {
            toml.queue.marker_label = label.trim().to_string();
        }
        if let Some(list) = lookup("ASSIGNEES") {
            toml.queue.assignees = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(agent) = lookup("COPILOT_ASSIGNEE") {
            toml.queue.automation_assignee = Some(agent.trim().to_string());
        }
        if let Some(value) = lookup("POLL_INTERVAL") {
            match value.trim().parse::<u64>() {
                Ok(secs) => toml.poll.interval_secs = secs,
                Err(_) => env_warnings.push(format!(
                    "POLL_INTERVAL '{}' is not a number of seconds; using {}",
                    value, toml.poll.interval_secs
                )),
            }
        }

        let token = lookup(provider.token_var()).map(|t| t.trim().to_string());
        let promoter_dir = project_dir.join(PROMOTER_DIR);

        Self {
            project_dir,
            promoter_dir,
            toml,
            token,
            env_warnings,
        }
    }

    pub fn provider(&self) -> Provider {
        self.toml.tracker.provider
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn config_file(&self) -> PathBuf {
        self.promoter_dir.join(CONFIG_FILE)
    }

    /// Directory holding the ledger and its lock.
    pub fn state_dir(&self) -> &Path {
        &self.promoter_dir
    }

    pub fn log_dir(&self) -> PathBuf {
        self.promoter_dir.join("logs")
    }

    pub fn issues_dir(&self) -> PathBuf {
        self.project_dir.join(&self.toml.queue.issues_dir)
    }

    pub fn api_url(&self) -> String {
        self.toml
            .tracker
            .api_url
            .clone()
            .unwrap_or_else(|| self.provider().default_api_url().to_string())
    }

    /// The repository or project this promoter manages, for display.
    pub fn target(&self) -> Option<&str> {
        match self.provider() {
            Provider::GitHub => self.toml.tracker.repository.as_deref(),
            Provider::GitLab => self.toml.tracker.project_id.as_deref(),
        }
    }

    /// Configured assignees followed by the automation assignee, deduplicated.
    pub fn assignees(&self) -> Vec<String> {
        let mut assignees = self.toml.queue.assignees.clone();
        if let Some(agent) = &self.toml.queue.automation_assignee
            && !assignees.iter().any(|a| a.eq_ignore_ascii_case(agent))
        {
            assignees.push(agent.clone());
        }
        assignees
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.toml.poll.interval_secs)
    }

    pub fn correlation_config(&self) -> CorrelationConfig {
        let section = &self.toml.correlation;
        CorrelationConfig {
            automation_authors: section.automation_authors.clone(),
            in_progress_markers: section.in_progress_markers.clone(),
            temporal_window: section
                .temporal_window()
                .unwrap_or_else(|| chrono::TimeDelta::hours(DEFAULT_TEMPORAL_WINDOW_HOURS)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let section = &self.toml.retry;
        RetryPolicy {
            max_attempts: section.max_attempts.max(1),
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }

    pub fn controller_settings(&self, dry_run: bool) -> ControllerSettings {
        ControllerSettings {
            issues_dir: self.issues_dir(),
            marker_label: self.toml.queue.marker_label.clone(),
            assignees: self.assignees(),
            manual_close: self.toml.completion.manual_close,
            dry_run,
        }
    }

    /// Build the configured tracker adapter wrapped in the retry policy.
    pub fn build_tracker(&self) -> Result<Arc<dyn TrackerClient>> {
        let provider = self.provider();
        let token = self
            .token()
            .with_context(|| format!("{} is not set", provider.token_var()))?;
        let timeout = Duration::from_secs(self.toml.tracker.timeout_secs.max(1));
        let api_url = self.api_url();
        let policy = self.retry_policy();

        let tracker: Arc<dyn TrackerClient> = match provider {
            Provider::GitHub => {
                let repo = self.toml.tracker.repository.as_deref().context(
                    "No GitHub repository configured (set tracker.repository or REPO_OWNER/REPO_NAME)",
                )?;
                let github = GitHubTracker::new(&api_url, repo, token, timeout)
                    .context("Failed to set up GitHub tracker")?;
                Arc::new(RetryingTracker::new(github, policy))
            }
            Provider::GitLab => {
                let project = self.toml.tracker.project_id.as_deref().context(
                    "No GitLab project configured (set tracker.project_id or PROJECT_ID)",
                )?;
                let gitlab = GitLabTracker::new(&api_url, project, token, timeout)
                    .context("Failed to set up GitLab tracker")?;
                Arc::new(RetryingTracker::new(gitlab, policy))
            }
        };
        Ok(tracker)
    }

    /// File problems, environment problems, and missing credentials.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        warnings.extend(self.env_warnings.iter().cloned());

        let provider = self.provider();
        match self.token() {
            None => warnings.push(format!("{} is not set", provider.token_var())),
            Some(token) if provider == Provider::GitHub && !is_valid_github_token(token) => {
                warnings.push("GITHUB_TOKEN does not look like a GitHub token".to_string());
            }
            Some(_) => {}
        }
        if self.target().is_none() {
            warnings.push(match provider {
                Provider::GitHub => {
                    "No repository configured (tracker.repository or REPO_OWNER/REPO_NAME)"
                        .to_string()
                }
                Provider::GitLab => {
                    "No project configured (tracker.project_id or PROJECT_ID)".to_string()
                }
            });
        }
        if !self.issues_dir().is_dir() {
            warnings.push(format!(
                "Issues directory {} does not exist",
                self.issues_dir().display()
            ));
        }

        warnings
    }
}
