//! GitHub API client.
//!
//! Provides an HTTP client for the GitHub REST API (v3) with optional token
//! authentication, page-at-a-time listing, rate-limit tracking, and retries
//! for transient failures.

use crate::config::GitHubSettings;
use crate::error::AppError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// REST API version pinned on every request.
pub const API_VERSION: &str = "2022-11-28";

/// Typed failure from a GitHub request.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Primary or secondary rate limit hit. `reset_at` is when the window reopens.
    #[error("GitHub rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Token missing, expired, or revoked.
    #[error("GitHub rejected the credentials (401)")]
    Unauthorized,

    /// 403 that is not a rate limit.
    #[error("GitHub denied access: {message}")]
    Forbidden { message: String },

    /// Repository renamed or deleted upstream, or private without access.
    #[error("GitHub resource not found: {endpoint}")]
    NotFound { endpoint: String },

    /// Connection failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream 5xx.
    #[error("GitHub server error {status} on {endpoint}")]
    Server { status: u16, endpoint: String },

    #[error("Unexpected status {status} on {endpoint}")]
    UnexpectedStatus { status: u16, endpoint: String },

    /// Response body did not match the expected shape.
    #[error("Failed to decode GitHub response: {0}")]
    Decode(String),

    /// Local client misconfiguration.
    #[error("GitHub client error: {0}")]
    Client(String),
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|t| format!(" (resets at {})", t.to_rfc3339()))
        .unwrap_or_default()
}

impl GitHubError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Client(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// GitHub user as embedded in issues and pull requests.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Issue from `GET /repos/{owner}/{repo}/issues`.
///
/// The issues endpoint also returns pull requests; those carry a
/// `pull_request` object.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    pub html_url: String,
    #[serde(default)]
    pub comments: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubBranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// Pull request from `GET /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub requested_reviewers: Vec<GitHubUser>,
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
    pub base: GitHubBranchRef,
    pub head: GitHubBranchRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl GitHubPullRequest {
    /// The list endpoint has no `merged` flag; a merge timestamp implies it.
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub items: Vec<T>,

    /// Whether GitHub has a further page.
    pub has_more: bool,
}

/// Rate-limit state from the most recent response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Unix seconds.
    pub reset_at: Option<i64>,
}

impl RateLimitInfo {
    fn update_from_headers(&mut self, headers: &header::HeaderMap) {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<i64>().ok())
        };
        if let Some(limit) = get("x-ratelimit-limit") {
            self.limit = u32::try_from(limit).ok();
        }
        if let Some(remaining) = get("x-ratelimit-remaining") {
            self.remaining = u32::try_from(remaining).ok();
        }
        if let Some(reset) = get("x-ratelimit-reset") {
            self.reset_at = Some(reset);
        }
    }

    /// Whether the window is exhausted and has not reset yet.
    pub fn is_exhausted(&self, now: i64) -> bool {
        self.remaining == Some(0) && self.reset_at.is_some_and(|reset| reset > now)
    }

    fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_at.and_then(|t| DateTime::from_timestamp(t, 0))
    }
}

/// What the sync engine needs from GitHub.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// One page of issues, pull requests excluded.
    async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<GitHubIssue>, GitHubError>;

    async fn fetch_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<GitHubPullRequest>, GitHubError>;

    /// Whether requests carry a token.
    fn is_authenticated(&self) -> bool;

    /// Last observed rate-limit state.
    fn rate_limit(&self) -> RateLimitInfo;
}

/// GitHub REST client.
#[derive(Debug)]
pub struct GitHubClient {
    client: Client,
    base_url: String,
    authenticated: bool,
    max_retries: u32,
    retry_backoff: Duration,
    rate_limit: Mutex<RateLimitInfo>,
}

impl GitHubClient {
    /// Create a client from configuration.
    pub fn new(settings: &GitHubSettings) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static(API_VERSION),
        );

        let authenticated = settings.has_token();
        if let Some(token) = settings.token.as_deref().filter(|_| authenticated) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| AppError::authentication("Invalid token format"))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("repo-radar/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            authenticated,
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            rate_limit: Mutex::new(RateLimitInfo::default()),
        })
    }

    fn repo_path(owner: &str, repo: &str, listing: &str) -> String {
        format!(
            "/repos/{}/{}/{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            listing
        )
    }

    fn record_headers(&self, headers: &header::HeaderMap) {
        if let Ok(mut state) = self.rate_limit.lock() {
            state.update_from_headers(headers);
        }
    }

    /// Fail fast while the previous response said the window is exhausted.
    fn check_rate_limit(&self) -> Result<(), GitHubError> {
        let state = self.rate_limit();
        if state.is_exhausted(Utc::now().timestamp()) {
            return Err(GitHubError::RateLimited {
                reset_at: state.reset_time(),
            });
        }
        Ok(())
    }

    /// Map a non-success response to the error taxonomy.
    async fn classify_error(response: Response, endpoint: &str) -> GitHubError {
        let status = response.status();
        let headers = response.headers().clone();
        let mut info = RateLimitInfo::default();
        info.update_from_headers(&headers);

        match status {
            StatusCode::UNAUTHORIZED => GitHubError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => GitHubError::RateLimited {
                reset_at: info.reset_time(),
            },
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                let lower = body.to_lowercase();
                let rate_limited = info.remaining == Some(0)
                    || headers.contains_key(header::RETRY_AFTER)
                    || lower.contains("rate limit");
                if rate_limited {
                    GitHubError::RateLimited {
                        reset_at: info.reset_time(),
                    }
                } else {
                    let message = serde_json::from_str::<serde_json::Value>(&body)
                        .ok()
                        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                        .unwrap_or_else(|| "Access denied".to_string());
                    GitHubError::Forbidden { message }
                }
            }
            StatusCode::NOT_FOUND => GitHubError::NotFound {
                endpoint: endpoint.to_string(),
            },
            s if s.is_server_error() => GitHubError::Server {
                status: s.as_u16(),
                endpoint: endpoint.to_string(),
            },
            s => GitHubError::UnexpectedStatus {
                status: s.as_u16(),
                endpoint: endpoint.to_string(),
            },
        }
    }

    /// Single attempt at one page.
    async fn request_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<T>, GitHubError> {
        self.check_rate_limit()?;

        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("state", "all"),
                ("sort", "updated"),
                ("direction", "desc"),
            ])
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        self.record_headers(response.headers());

        if !response.status().is_success() {
            return Err(Self::classify_error(response, endpoint).await);
        }

        let link_next = has_next_link(response.headers());
        let bytes = response.bytes().await?;
        let items: Vec<T> =
            serde_json::from_slice(&bytes).map_err(|e| GitHubError::Decode(e.to_string()))?;

        let has_more = link_next.unwrap_or(items.len() as u32 >= per_page);
        Ok(PageResult { items, has_more })
    }

    /// Fetch a page, retrying transient failures with doubling backoff.
    async fn get_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<T>, GitHubError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_backoff)
            .with_max_times(self.max_retries as usize);

        (|| self.request_page::<T>(endpoint, page, per_page))
            .retry(backoff)
            .when(GitHubError::is_transient)
            .notify(|err, delay| {
                log::warn!(
                    "[github] {} page {} failed ({}), retrying in {:?}",
                    endpoint,
                    page,
                    err,
                    delay
                );
            })
            .await
    }
}

/// `Some(true)` if the `Link` header has `rel="next"`, `None` without a header.
fn has_next_link(headers: &header::HeaderMap) -> Option<bool> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    Some(
        link.split(',')
            .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\"")),
    )
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<GitHubIssue>, GitHubError> {
        let endpoint = Self::repo_path(owner, repo, "issues");
        let result = self.get_page::<GitHubIssue>(&endpoint, page, per_page).await?;

        // has_more is decided on the raw page, before pull requests are dropped
        Ok(PageResult {
            items: result
                .items
                .into_iter()
                .filter(|issue| !issue.is_pull_request())
                .collect(),
            has_more: result.has_more,
        })
    }

    async fn fetch_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PageResult<GitHubPullRequest>, GitHubError> {
        let endpoint = Self::repo_path(owner, repo, "pulls");
        self.get_page(&endpoint, page, per_page).await
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn rate_limit(&self) -> RateLimitInfo {
        self.rate_limit
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }
}
