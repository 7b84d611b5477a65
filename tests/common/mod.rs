//! Shared fixtures for integration tests: a temp-file database, repository
//! set-up, and a scripted in-memory GitHub.

#![allow(dead_code)]

use async_trait::async_trait;
use repo_radar::db::{self, pool::DbPool};
use repo_radar::models::repository::{self, NewRepository, Repository};
use repo_radar::services::github_client::{
    GitHubApi, GitHubError, GitHubIssue, GitHubPullRequest, PageResult, RateLimitInfo,
};
use repo_radar::services::sync_engine::SyncSettings;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::Notify;

/// Fresh migrated database in a temp dir. Keep the `TempDir` alive.
pub async fn setup_test_db() -> (TempDir, DbPool) {
    let dir = tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
    (dir, pool)
}

pub async fn add_repository(pool: &DbPool, owner: &str, name: &str, priority: i64) -> Repository {
    repository::create_repository(
        pool,
        &NewRepository {
            owner: owner.to_string(),
            name: name.to_string(),
            display_name: None,
            category: Some("tools".to_string()),
            tags: vec![],
            priority,
            active: true,
        },
    )
    .await
    .unwrap()
}

/// Engine settings with no pauses.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        request_delay: Duration::ZERO,
        repository_delay: Duration::ZERO,
        ..SyncSettings::default()
    }
}

pub fn issue(number: i64, title: &str, updated_at: &str) -> GitHubIssue {
    serde_json::from_value(json!({
        "id": 1000 + number,
        "number": number,
        "title": title,
        "body": format!("Body of {}. Related to #{}", title, number + 1),
        "state": "open",
        "user": {"login": "octocat", "html_url": "https://github.com/octocat"},
        "assignees": [],
        "labels": [{"name": "bug", "color": "d73a4a"}],
        "html_url": format!("https://github.com/o/r/issues/{}", number),
        "comments": 0,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": updated_at,
        "closed_at": null
    }))
    .unwrap()
}

pub fn pull_request(number: i64, title: &str, updated_at: &str) -> GitHubPullRequest {
    serde_json::from_value(json!({
        "id": 5000 + number,
        "number": number,
        "title": title,
        "body": "Fixes #1",
        "state": "open",
        "user": {"login": "octocat", "html_url": "https://github.com/octocat"},
        "assignees": [],
        "labels": [],
        "requested_reviewers": [{"login": "reviewer", "html_url": "https://github.com/reviewer"}],
        "html_url": format!("https://github.com/o/r/pull/{}", number),
        "draft": false,
        "base": {"ref": "main"},
        "head": {"ref": format!("feature-{}", number)},
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": updated_at,
        "closed_at": null,
        "merged_at": null
    }))
    .unwrap()
}

/// In-memory GitHub serving scripted pages per repository.
#[derive(Default)]
pub struct ScriptedGitHub {
    pub authenticated: bool,
    issue_pages: Mutex<HashMap<String, Vec<Vec<GitHubIssue>>>>,
    pr_pages: Mutex<HashMap<String, Vec<Vec<GitHubPullRequest>>>>,
    failing: Mutex<HashSet<String>>,
    /// Report another page even past the scripted ones.
    endless: bool,
    pub issue_calls: AtomicUsize,
    pub pr_calls: AtomicUsize,
}

impl ScriptedGitHub {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            ..Default::default()
        }
    }

    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub fn set_issues(&self, full_name: &str, pages: Vec<Vec<GitHubIssue>>) {
        self.issue_pages
            .lock()
            .unwrap()
            .insert(full_name.to_string(), pages);
    }

    pub fn set_pull_requests(&self, full_name: &str, pages: Vec<Vec<GitHubPullRequest>>) {
        self.pr_pages
            .lock()
            .unwrap()
            .insert(full_name.to_string(), pages);
    }

    /// Every request for this repository fails with a network error.
    pub fn fail(&self, full_name: &str) {
        self.failing.lock().unwrap().insert(full_name.to_string());
    }

    pub fn total_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst) + self.pr_calls.load(Ordering::SeqCst)
    }

    fn page_of<T: Clone>(
        &self,
        pages: &Mutex<HashMap<String, Vec<Vec<T>>>>,
        full_name: &str,
        page: u32,
    ) -> Result<PageResult<T>, GitHubError> {
        if self.failing.lock().unwrap().contains(full_name) {
            return Err(GitHubError::Network("connection reset".to_string()));
        }
        let pages = pages.lock().unwrap();
        let scripted = pages.get(full_name).cloned().unwrap_or_default();
        let index = page as usize - 1;
        Ok(PageResult {
            items: scripted.get(index).cloned().unwrap_or_default(),
            has_more: self.endless || index + 1 < scripted.len(),
        })
    }
}

#[async_trait]
impl GitHubApi for ScriptedGitHub {
    async fn fetch_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        _per_page: u32,
    ) -> Result<PageResult<GitHubIssue>, GitHubError> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        self.page_of(&self.issue_pages, &format!("{}/{}", owner, repo), page)
    }

    async fn fetch_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        _per_page: u32,
    ) -> Result<PageResult<GitHubPullRequest>, GitHubError> {
        self.pr_calls.fetch_add(1, Ordering::SeqCst);
        self.page_of(&self.pr_pages, &format!("{}/{}", owner, repo), page)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn rate_limit(&self) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}

/// GitHub whose first issues request parks until released.
#[derive(Default)]
pub struct BlockingGitHub {
    pub entered: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

#[async_trait]
impl GitHubApi for BlockingGitHub {
    async fn fetch_issues(
        &self,
        _owner: &str,
        _repo: &str,
        _page: u32,
        _per_page: u32,
    ) -> Result<PageResult<GitHubIssue>, GitHubError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(PageResult {
            items: vec![],
            has_more: false,
        })
    }

    async fn fetch_pull_requests(
        &self,
        _owner: &str,
        _repo: &str,
        _page: u32,
        _per_page: u32,
    ) -> Result<PageResult<GitHubPullRequest>, GitHubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PageResult {
            items: vec![],
            has_more: false,
        })
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn rate_limit(&self) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}
