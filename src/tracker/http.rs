//! HTTP plumbing shared by the vendor adapters.

use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::errors::TrackerError;

pub(crate) const USER_AGENT: &str = concat!("promoter/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, TrackerError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TrackerError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure (no HTTP status) onto the taxonomy.
pub(crate) fn send_error(err: reqwest::Error) -> TrackerError {
    if err.is_timeout() {
        TrackerError::Timeout
    } else {
        TrackerError::Unavailable(err.to_string())
    }
}

/// Pass successful responses through; classify the rest.
pub(crate) async fn check_status(resp: Response) -> Result<Response, TrackerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let headers = resp.headers().clone();
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, &headers, &body))
}

/// Decode a JSON body, reporting schema mismatches as malformed payloads.
pub(crate) async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, TrackerError> {
    let text = resp.text().await.map_err(send_error)?;
    serde_json::from_str(&text).map_err(|e| TrackerError::Malformed(format!("{what}: {e}")))
}

pub(crate) fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> TrackerError {
    let message = truncate(body);
    match status {
        StatusCode::UNAUTHORIZED => TrackerError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN if is_rate_limited(headers, body) => TrackerError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN => TrackerError::Permission(message),
        StatusCode::NOT_FOUND => TrackerError::NotFound(message),
        s if s.is_server_error() => TrackerError::Unavailable(format!("{s}: {message}")),
        s => TrackerError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

fn is_rate_limited(headers: &HeaderMap, body: &str) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    exhausted || body.to_ascii_lowercase().contains("rate limit")
}

/// `Retry-After` seconds, falling back to GitHub's `x-ratelimit-reset` epoch.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-ratelimit-reset").map(|reset| {
        let wait = reset - chrono::Utc::now().timestamp();
        Duration::from_secs(wait.max(0) as u64)
    })
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
