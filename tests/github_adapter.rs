//! GitHub adapter tests against an in-process mock of the REST API.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use promoter::errors::TrackerError;
use promoter::tracker::github::label_color;
use promoter::tracker::{
    ArtifactId, GitHubTracker, ItemId, MergeState, NewWorkItem, RetryPolicy, RetryingTracker,
    TrackerClient,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

const TOKEN: &str = "ghp_testtoken";

#[derive(Default)]
struct Repo {
    issues: Vec<Value>,
    pulls: Vec<Value>,
    labels: Vec<String>,
    timelines: HashMap<u64, Vec<Value>>,
    commit_pulls: HashMap<String, Vec<u64>>,
    users: Vec<String>,
    created: Vec<Value>,
    created_labels: Vec<Value>,
    rate_limit_next: bool,
    timeline_requests: usize,
}

type Shared = Arc<Mutex<Repo>>;
type Params = Query<HashMap<String, String>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Bad credentials" })),
    )
        .into_response()
}

fn first_page(params: &HashMap<String, String>) -> bool {
    params.get("page").map(String::as_str).unwrap_or("1") == "1"
}

fn issue(number: u64, title: &str, state: &str, labels: &[&str]) -> Value {
    json!({
        "number": number,
        "title": title,
        "state": state,
        "created_at": format!("2024-03-{:02}T10:00:00Z", number.min(28)),
        "html_url": format!("https://github.test/acme/widgets/issues/{number}"),
        "labels": labels.iter().map(|l| json!({ "name": l })).collect::<Vec<_>>(),
    })
}

fn pull(number: u64, created_at: &str, state: &str, merged: bool, author: &str) -> Value {
    json!({
        "number": number,
        "title": format!("Change {number}"),
        "body": null,
        "user": { "login": author },
        "state": state,
        "created_at": created_at,
        "merged_at": if merged { json!(created_at) } else { Value::Null },
    })
}

async fn whoami(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "login": "promoter-bot" })).into_response()
}

async fn list_issues(
    State(repo): State<Shared>,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut repo = repo.lock().unwrap();
    if std::mem::take(&mut repo.rate_limit_next) {
        return (
            StatusCode::FORBIDDEN,
            [("x-ratelimit-remaining", "0"), ("retry-after", "0")],
            "API rate limit exceeded",
        )
            .into_response();
    }
    if !first_page(&params) {
        return Json(json!([])).into_response();
    }
    let label = params.get("labels").cloned().unwrap_or_default();
    let issues: Vec<Value> = repo
        .issues
        .iter()
        .filter(|i| {
            i["labels"]
                .as_array()
                .is_some_and(|ls| ls.iter().any(|l| l["name"] == label.as_str()))
        })
        .cloned()
        .collect();
    Json(json!(issues)).into_response()
}

async fn create_issue(State(repo): State<Shared>, Json(payload): Json<Value>) -> Response {
    let mut repo = repo.lock().unwrap();
    let number = 100 + repo.created.len() as u64;
    let labels: Vec<&str> = payload["labels"]
        .as_array()
        .map(|ls| ls.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let created = issue(
        number,
        payload["title"].as_str().unwrap_or_default(),
        "open",
        &labels,
    );
    repo.created.push(payload.clone());
    repo.issues.push(created.clone());
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn get_issue(
    State(repo): State<Shared>,
    Path((_owner, _name, number)): Path<(String, String, u64)>,
) -> Response {
    let repo = repo.lock().unwrap();
    match repo.issues.iter().find(|i| i["number"] == number) {
        Some(found) => Json(found.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
    }
}

async fn timeline(
    State(repo): State<Shared>,
    Path((_owner, _name, number)): Path<(String, String, u64)>,
    Query(params): Params,
) -> Json<Value> {
    let mut repo = repo.lock().unwrap();
    repo.timeline_requests += 1;
    if !first_page(&params) {
        return Json(json!([]));
    }
    Json(json!(repo.timelines.get(&number).cloned().unwrap_or_default()))
}

async fn commit_pulls(
    State(repo): State<Shared>,
    Path((_owner, _name, sha)): Path<(String, String, String)>,
) -> Json<Value> {
    let repo = repo.lock().unwrap();
    let numbers = repo.commit_pulls.get(&sha).cloned().unwrap_or_default();
    Json(json!(numbers.iter().map(|n| json!({ "number": n })).collect::<Vec<_>>()))
}

async fn list_pulls(State(repo): State<Shared>, Query(params): Params) -> Json<Value> {
    let repo = repo.lock().unwrap();
    if !first_page(&params) {
        return Json(json!([]));
    }
    Json(json!(repo.pulls))
}

async fn get_pull(
    State(repo): State<Shared>,
    Path((_owner, _name, number)): Path<(String, String, u64)>,
) -> Response {
    let repo = repo.lock().unwrap();
    match repo.pulls.iter().find(|p| p["number"] == number) {
        Some(found) => Json(found.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
    }
}

async fn list_labels(State(repo): State<Shared>, Query(params): Params) -> Json<Value> {
    let repo = repo.lock().unwrap();
    if !first_page(&params) {
        return Json(json!([]));
    }
    Json(json!(
        repo.labels
            .iter()
            .map(|name| json!({ "name": name }))
            .collect::<Vec<_>>()
    ))
}

async fn create_label(State(repo): State<Shared>, Json(payload): Json<Value>) -> Response {
    let mut repo = repo.lock().unwrap();
    if let Some(name) = payload["name"].as_str() {
        repo.labels.push(name.to_string());
    }
    repo.created_labels.push(payload.clone());
    (StatusCode::CREATED, Json(payload)).into_response()
}

async fn get_user(State(repo): State<Shared>, Path(name): Path<String>) -> Response {
    let repo = repo.lock().unwrap();
    if repo.users.contains(&name) {
        Json(json!({ "login": name })).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response()
    }
}

async fn spawn_mock(repo: Repo) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(repo));
    let app = Router::new()
        .route("/user", get(whoami))
        .route("/users/{name}", get(get_user))
        .route(
            "/repos/{owner}/{name}/issues",
            get(list_issues).post(create_issue),
        )
        .route("/repos/{owner}/{name}/issues/{number}", get(get_issue))
        .route(
            "/repos/{owner}/{name}/issues/{number}/timeline",
            get(timeline),
        )
        .route(
            "/repos/{owner}/{name}/commits/{sha}/pulls",
            get(commit_pulls),
        )
        .route("/repos/{owner}/{name}/pulls", get(list_pulls))
        .route("/repos/{owner}/{name}/pulls/{number}", get(get_pull))
        .route(
            "/repos/{owner}/{name}/labels",
            get(list_labels).post(create_label),
        )
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("run mock server");
    });
    (format!("http://{address}"), state)
}

fn tracker(base_url: &str, token: &str) -> GitHubTracker {
    GitHubTracker::new(base_url, "acme/widgets", token, Duration::from_secs(5)).unwrap()
}

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_whoami_and_bad_credentials() {
    let (url, _) = spawn_mock(Repo::default()).await;

    assert_eq!(tracker(&url, TOKEN).whoami().await.unwrap(), "promoter-bot");

    let err = tracker(&url, "ghp_wrong").whoami().await.unwrap_err();
    assert!(matches!(err, TrackerError::Auth(_)), "got {err:?}");
    assert!(err.is_permanent());
}

fn closed_by_commit(sha: &str, repo: &str) -> Value {
    json!({
        "event": "closed",
        "commit_id": sha,
        "commit_url": format!("https://api.github.test/repos/{repo}/commits/{sha}"),
    })
}

fn cross_reference(number: u64, repo: &str) -> Value {
    json!({
        "event": "cross-referenced",
        "source": {
            "type": "issue",
            "issue": {
                "number": number,
                "pull_request": {},
                "repository": { "full_name": repo },
            }
        }
    })
}

#[tokio::test]
async fn test_list_managed_items_without_evidence_lookups() {
    let mut repo = Repo::default();
    repo.issues = vec![
        issue(1, "001 Set up project", "open", &["auto-generated"]),
        issue(2, "002 Add API", "closed", &["auto-generated", "backend"]),
        {
            let mut pr = issue(3, "Fix #2", "open", &["auto-generated"]);
            pr["pull_request"] = json!({ "url": "https://github.test/pulls/3" });
            pr
        },
        issue(4, "Unrelated bug", "open", &["bug"]),
    ];
    repo.timelines
        .insert(2, vec![closed_by_commit("abc123", "acme/widgets")]);
    repo.commit_pulls.insert("abc123".to_string(), vec![11]);
    let (url, state) = spawn_mock(repo).await;

    let items = tracker(&url, TOKEN)
        .list_managed_items("auto-generated")
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, ItemId::new("1"));
    assert!(items[0].is_open());
    assert_eq!(items[1].title, "002 Add API");
    assert!(!items[1].is_open());
    assert_eq!(items[1].labels, vec!["auto-generated", "backend"]);
    assert!(items.iter().all(|i| i.closing_evidence.is_empty()));
    assert_eq!(state.lock().unwrap().timeline_requests, 0);
}

#[tokio::test]
async fn test_closing_evidence_from_local_closing_commit() {
    let mut repo = Repo::default();
    repo.issues = vec![issue(2, "002 Add API", "closed", &["auto-generated"])];
    repo.timelines.insert(
        2,
        vec![
            json!({ "event": "labeled" }),
            closed_by_commit("abc123", "acme/widgets"),
            cross_reference(13, "acme/widgets"),
            json!({ "event": "connected" }),
            // A fork closing the issue through its own commit.
            closed_by_commit("def456", "someone-else/fork"),
        ],
    );
    repo.commit_pulls.insert("abc123".to_string(), vec![11]);
    repo.commit_pulls.insert("def456".to_string(), vec![12]);
    let (url, state) = spawn_mock(repo).await;

    let evidence = tracker(&url, TOKEN)
        .closing_evidence(&ItemId::new("2"))
        .await
        .unwrap();

    assert_eq!(evidence, BTreeSet::from([ArtifactId::new("11")]));
    assert_eq!(state.lock().unwrap().timeline_requests, 1);
}

#[tokio::test]
async fn test_foreign_cross_reference_is_not_evidence() {
    let mut repo = Repo::default();
    repo.issues = vec![issue(5, "005 Add caching", "closed", &["auto-generated"])];
    repo.timelines.insert(
        5,
        vec![
            cross_reference(12, "someone-else/fork"),
            json!({ "event": "connected" }),
            json!({ "event": "closed", "commit_id": null }),
        ],
    );
    // Same number as the foreign pull request, but a different change.
    repo.pulls = vec![pull(12, "2024-03-06T10:00:00Z", "closed", false, "alice")];
    let (url, _) = spawn_mock(repo).await;

    let evidence = tracker(&url, TOKEN)
        .closing_evidence(&ItemId::new("5"))
        .await
        .unwrap();

    assert!(evidence.is_empty(), "got {evidence:?}");
}

#[tokio::test]
async fn test_get_artifact() {
    let mut repo = Repo::default();
    repo.pulls = vec![pull(12, "2024-03-02T09:00:00Z", "closed", true, "copilot-swe-agent")];
    let (url, _) = spawn_mock(repo).await;
    let tracker = tracker(&url, TOKEN);

    let artifact = tracker.get_artifact(&ArtifactId::new("12")).await.unwrap();
    assert_eq!(artifact.id, ArtifactId::new("12"));
    assert_eq!(artifact.merge_state, MergeState::Merged);
    assert_eq!(artifact.created_at, ts("2024-03-02T09:00:00Z"));

    let err = tracker
        .get_artifact(&ArtifactId::new("99"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_create_item_skips_unknown_assignees() {
    let mut repo = Repo::default();
    repo.users = vec!["alice".to_string()];
    let (url, state) = spawn_mock(repo).await;

    let created = tracker(&url, TOKEN)
        .create_item(&NewWorkItem {
            title: "003 Add caching".to_string(),
            body: "Cache the things.".to_string(),
            labels: vec!["auto-generated".to_string(), "perf".to_string()],
            assignees: vec!["alice".to_string(), "nobody-here".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(created.id, ItemId::new("100"));
    assert_eq!(created.title, "003 Add caching");
    assert!(created.is_open());
    assert_eq!(
        created.web_url.as_deref(),
        Some("https://github.test/acme/widgets/issues/100")
    );

    let state = state.lock().unwrap();
    let payload = &state.created[0];
    assert_eq!(payload["body"], "Cache the things.");
    assert_eq!(payload["labels"], json!(["auto-generated", "perf"]));
    assert_eq!(payload["assignees"], json!(["alice"]));
}

#[tokio::test]
async fn test_ensure_labels_reuses_and_creates() {
    let mut repo = Repo::default();
    repo.labels = vec!["auto-generated".to_string(), "Backend".to_string()];
    let (url, state) = spawn_mock(repo).await;

    let labels = tracker(&url, TOKEN)
        .ensure_labels(&[
            "Auto-Generated".to_string(),
            "backend".to_string(),
            "frontend".to_string(),
            "  ".to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(labels, vec!["auto-generated", "Backend", "frontend"]);
    let state = state.lock().unwrap();
    assert_eq!(state.created_labels.len(), 1);
    assert_eq!(state.created_labels[0]["name"], "frontend");
    assert_eq!(state.created_labels[0]["color"], label_color("frontend"));
}

#[tokio::test]
async fn test_list_artifacts_since_stops_at_cutoff() {
    let mut repo = Repo::default();
    repo.pulls = vec![
        pull(23, "2024-03-03T12:00:00Z", "open", false, "Copilot"),
        pull(22, "2024-03-02T12:00:00Z", "closed", true, "alice"),
        pull(21, "2024-03-01T00:00:00Z", "closed", false, "bob"),
        pull(20, "2024-02-01T12:00:00Z", "closed", true, "bob"),
    ];
    let (url, _) = spawn_mock(repo).await;

    let artifacts = tracker(&url, TOKEN)
        .list_artifacts_since(ts("2024-03-01T00:00:00Z"))
        .await
        .unwrap();

    let ids: Vec<&str> = artifacts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["23", "22", "21"]);
    assert_eq!(artifacts[0].merge_state, MergeState::Open);
    assert_eq!(artifacts[0].author, "Copilot");
    assert_eq!(artifacts[0].body, "");
    assert_eq!(artifacts[1].merge_state, MergeState::Merged);
    assert_eq!(artifacts[2].merge_state, MergeState::ClosedUnmerged);
}

#[tokio::test]
async fn test_get_item_missing_and_pull_request() {
    let mut repo = Repo::default();
    repo.issues = vec![{
        let mut pr = issue(5, "A pull request", "open", &[]);
        pr["pull_request"] = json!({});
        pr
    }];
    let (url, _) = spawn_mock(repo).await;
    let github = tracker(&url, TOKEN);

    let err = github.get_item(&ItemId::new("404")).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)), "got {err:?}");

    let err = github.get_item(&ItemId::new("5")).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_rate_limit_is_transient_and_retried() {
    let mut repo = Repo::default();
    repo.issues = vec![issue(1, "001 First", "open", &["auto-generated"])];
    repo.rate_limit_next = true;
    let (url, state) = spawn_mock(repo).await;

    let err = tracker(&url, TOKEN)
        .list_managed_items("auto-generated")
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::RateLimited { .. }), "got {err:?}");
    assert!(err.is_transient());

    state.lock().unwrap().rate_limit_next = true;
    let retrying = RetryingTracker::new(
        tracker(&url, TOKEN),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    );
    let items = retrying.list_managed_items("auto-generated").await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_unknown_issue_state_is_malformed() {
    let mut repo = Repo::default();
    repo.issues = vec![issue(1, "001 Odd", "archived", &["auto-generated"])];
    let (url, _) = spawn_mock(repo).await;

    let err = tracker(&url, TOKEN)
        .list_managed_items("auto-generated")
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Malformed(_)), "got {err:?}");
}
