//! Sync engine for mirroring GitHub issues and pull requests.
//!
//! This module provides the core sync functionality:
//! - Page-by-page fetching capped by the authentication mode
//! - Per-item reconciliation into the local store
//! - One sync history row per (session, repository, data type)
//! - Continue-on-error across repositories
//! - A process-wide single-flight guard

use crate::config::GitHubSettings;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::repository::{self, Repository};
use crate::models::sync_history::{self, DataType, NewSyncHistory, SyncStatus};
use crate::services::github_client::{
    GitHubApi, GitHubError, GitHubIssue, GitHubPullRequest, PageResult, RateLimitInfo,
};
use crate::services::reconcile::{self, ReconcileCounts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Pacing and paging knobs for the engine.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub per_page: u32,
    pub max_pages_authenticated: u32,
    pub max_pages_unauthenticated: u32,
    /// Pause between page requests.
    pub request_delay: Duration,
    /// Pause between repositories in a full pass.
    pub repository_delay: Duration,
}

impl From<&GitHubSettings> for SyncSettings {
    fn from(github: &GitHubSettings) -> Self {
        Self {
            per_page: github.per_page,
            max_pages_authenticated: github.max_pages_authenticated,
            max_pages_unauthenticated: github.max_pages_unauthenticated,
            request_delay: Duration::from_millis(github.request_delay_ms),
            repository_delay: Duration::from_millis(github.repository_delay_ms),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&GitHubSettings::default())
    }
}

/// What a trigger asks to sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SyncScope {
    /// Every active repository.
    All,
    /// Issues then pull requests of one repository.
    Repository { repository: String },
    /// One data type of one repository.
    RepositoryDataType {
        repository: String,
        data_type: DataType,
    },
}

/// Where a sub-operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Pending,
    Fetching,
    Reconciling,
    Recorded,
}

/// Outcome of one (repository, data type) sub-operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub repository: String,
    pub data_type: DataType,
    pub status: SyncStatus,
    pub counts: ReconcileCounts,
    pub pages_fetched: i64,
    pub error: Option<String>,
    /// `network`, `rate_limited`, `authentication`, `reconciliation`, ...
    pub error_kind: Option<String>,
    pub duration_ms: i64,
}

/// Summary returned by every trigger.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub session_id: String,
    pub scope: SyncScope,
    /// `success` when every sub-operation succeeded, otherwise `partial`.
    pub status: SyncStatus,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: i64,
    pub totals: ReconcileCounts,
    pub operations: Vec<OperationResult>,
    /// `repository (data type): message` for each failed sub-operation.
    pub errors: Vec<String>,
}

/// Live engine state, readable while a sync runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub is_syncing: bool,
    pub session_id: Option<String>,
    pub repository: Option<String>,
    pub data_type: Option<DataType>,
    pub phase: Option<SyncPhase>,
    pub last_report: Option<SyncReport>,
}

/// One fetched page of either listing.
enum FetchedPage {
    Issues(PageResult<GitHubIssue>),
    PullRequests(PageResult<GitHubPullRequest>),
}

impl FetchedPage {
    fn has_more(&self) -> bool {
        match self {
            Self::Issues(page) => page.has_more,
            Self::PullRequests(page) => page.has_more,
        }
    }
}

/// Drives sync passes. Share it behind an `Arc`.
pub struct SyncEngine {
    /// Database connection pool.
    pool: DbPool,

    client: Arc<dyn GitHubApi>,

    settings: SyncSettings,

    /// Held for the whole of a pass.
    guard: Mutex<()>,

    status: RwLock<EngineStatus>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(pool: DbPool, client: Arc<dyn GitHubApi>, settings: SyncSettings) -> Self {
        Self {
            pool,
            client,
            settings,
            guard: Mutex::new(()),
            status: RwLock::new(EngineStatus::default()),
        }
    }

    /// Current engine state.
    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    /// Whether a pass is running right now.
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Rate-limit state from the client's last response.
    pub fn rate_limit(&self) -> RateLimitInfo {
        self.client.rate_limit()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    /// Page cap for the client's authentication mode.
    pub fn max_pages(&self) -> u32 {
        if self.client.is_authenticated() {
            self.settings.max_pages_authenticated
        } else {
            self.settings.max_pages_unauthenticated
        }
    }

    /// Run a sync for the given scope.
    pub async fn trigger(&self, scope: SyncScope) -> Result<SyncReport, AppError> {
        match scope {
            SyncScope::All => self.sync_all_repositories().await,
            SyncScope::Repository { repository } => self.sync_repository_all(&repository).await,
            SyncScope::RepositoryDataType {
                repository,
                data_type: DataType::Issues,
            } => self.sync_repository_issues(&repository).await,
            SyncScope::RepositoryDataType {
                repository,
                data_type: DataType::Prs,
            } => self.sync_repository_prs(&repository).await,
        }
    }

    /// Sync issues of one repository.
    pub async fn sync_repository_issues(&self, full_name: &str) -> Result<SyncReport, AppError> {
        self.run_single(full_name, &[DataType::Issues], |repository| {
            SyncScope::RepositoryDataType {
                repository,
                data_type: DataType::Issues,
            }
        })
        .await
    }

    /// Sync pull requests of one repository.
    pub async fn sync_repository_prs(&self, full_name: &str) -> Result<SyncReport, AppError> {
        self.run_single(full_name, &[DataType::Prs], |repository| {
            SyncScope::RepositoryDataType {
                repository,
                data_type: DataType::Prs,
            }
        })
        .await
    }

    /// Sync issues then pull requests of one repository under one session.
    pub async fn sync_repository_all(&self, full_name: &str) -> Result<SyncReport, AppError> {
        self.run_single(full_name, &[DataType::Issues, DataType::Prs], |repository| {
            SyncScope::Repository { repository }
        })
        .await
    }

    /// Sync every active repository in priority order.
    ///
    /// A failing repository is recorded and the pass moves on.
    pub async fn sync_all_repositories(&self) -> Result<SyncReport, AppError> {
        let _guard = self.acquire().await?;

        let repositories = repository::list_repositories(&self.pool, true).await?;
        log::info!(
            "[sync] Full pass over {} active repositories",
            repositories.len()
        );

        self.run_session(SyncScope::All, &repositories, &[DataType::Issues, DataType::Prs])
            .await
    }

    async fn run_single(
        &self,
        full_name: &str,
        data_types: &[DataType],
        scope: impl FnOnce(String) -> SyncScope,
    ) -> Result<SyncReport, AppError> {
        let _guard = self.acquire().await?;

        let repo = repository::get_repository(&self.pool, full_name)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Repository", full_name))?;

        self.run_session(scope(repo.full_name.clone()), &[repo], data_types)
            .await
    }

    /// Take the single-flight guard or report the running session.
    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, AppError> {
        match self.guard.try_lock() {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let session = self.status.read().await.session_id.clone();
                log::info!("[sync] Trigger rejected, sync already running");
                Err(AppError::sync_in_progress(session.unwrap_or_default()))
            }
        }
    }

    /// Run sub-operations for each repository. The caller holds the guard.
    async fn run_session(
        &self,
        scope: SyncScope,
        repositories: &[Repository],
        data_types: &[DataType],
    ) -> Result<SyncReport, AppError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = now();
        let start = Instant::now();

        {
            let mut status = self.status.write().await;
            status.is_syncing = true;
            status.session_id = Some(session_id.clone());
            status.repository = None;
            status.data_type = None;
            status.phase = Some(SyncPhase::Pending);
        }

        let result = self
            .run_operations(&session_id, repositories, data_types)
            .await;

        let mut status = self.status.write().await;
        status.is_syncing = false;
        status.repository = None;
        status.data_type = None;
        status.phase = None;

        let operations = match result {
            Ok(operations) => operations,
            Err(e) => {
                log::error!("[sync] Session {} aborted: {}", session_id, e);
                status.session_id = None;
                return Err(e);
            }
        };

        let mut totals = ReconcileCounts::default();
        let mut errors = Vec::new();
        for op in &operations {
            totals.add(&op.counts);
            if let Some(message) = &op.error {
                errors.push(format!("{} ({}): {}", op.repository, op.data_type, message));
            }
        }

        let overall = if operations.iter().all(|op| op.status == SyncStatus::Success) {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };

        let report = SyncReport {
            session_id: session_id.clone(),
            scope,
            status: overall,
            started_at,
            finished_at: now(),
            duration_ms: start.elapsed().as_millis() as i64,
            totals,
            operations,
            errors,
        };

        log::info!(
            "[sync] Session {} {}: {} new, {} updated, {} unchanged, {} errors in {}ms",
            session_id,
            report.status,
            report.totals.new,
            report.totals.updated,
            report.totals.unchanged,
            report.errors.len(),
            report.duration_ms
        );

        status.session_id = None;
        status.last_report = Some(report.clone());
        Ok(report)
    }

    async fn run_operations(
        &self,
        session_id: &str,
        repositories: &[Repository],
        data_types: &[DataType],
    ) -> Result<Vec<OperationResult>, AppError> {
        let mut operations = Vec::new();

        for (index, repo) in repositories.iter().enumerate() {
            if index > 0 {
                pause(self.settings.repository_delay).await;
            }
            for data_type in data_types {
                operations.push(self.run_operation(session_id, repo, *data_type).await?);
            }
        }

        Ok(operations)
    }

    async fn set_phase(&self, repo: &Repository, data_type: DataType, phase: SyncPhase) {
        let mut status = self.status.write().await;
        status.repository = Some(repo.full_name.clone());
        status.data_type = Some(data_type);
        status.phase = Some(phase);
    }

    /// Fetch, reconcile, and record one (repository, data type).
    ///
    /// Fetch errors end the operation with status `error`; items committed from
    /// earlier pages stay. Only a failure to write the history row is returned
    /// as `Err`.
    async fn run_operation(
        &self,
        session_id: &str,
        repo: &Repository,
        data_type: DataType,
    ) -> Result<OperationResult, AppError> {
        let start = Instant::now();
        let max_pages = self.max_pages();

        self.set_phase(repo, data_type, SyncPhase::Pending).await;

        let mut counts = ReconcileCounts::default();
        let mut pages_fetched = 0i64;
        let mut item_errors: Vec<AppError> = Vec::new();
        let mut fetch_error: Option<GitHubError> = None;

        for page in 1..=max_pages {
            if page > 1 {
                pause(self.settings.request_delay).await;
            }

            self.set_phase(repo, data_type, SyncPhase::Fetching).await;
            let fetched = match self.fetch_page(repo, data_type, page).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    log::warn!(
                        "[sync] {} {} page {} failed: {}",
                        repo.full_name,
                        data_type,
                        page,
                        e
                    );
                    fetch_error = Some(e);
                    break;
                }
            };
            pages_fetched += 1;

            self.set_phase(repo, data_type, SyncPhase::Reconciling).await;
            self.reconcile_page(&repo.full_name, &fetched, &mut counts, &mut item_errors)
                .await;

            if !fetched.has_more() {
                break;
            }
            if page == max_pages {
                log::debug!(
                    "[sync] {} {} stopped at page cap {}",
                    repo.full_name,
                    data_type,
                    max_pages
                );
            }
        }

        let (status, error, error_kind) = match (fetch_error, item_errors.first()) {
            (Some(e), _) => {
                let message = e.to_string();
                (
                    SyncStatus::Error,
                    Some(message),
                    Some(AppError::from(e).kind().to_string()),
                )
            }
            (None, Some(first)) => (
                SyncStatus::Partial,
                Some(format!(
                    "{} item(s) failed to reconcile; first: {}",
                    item_errors.len(),
                    first
                )),
                Some(first.kind().to_string()),
            ),
            (None, None) => (SyncStatus::Success, None, None),
        };
        let duration_ms = start.elapsed().as_millis() as i64;

        sync_history::insert_sync_history(
            &self.pool,
            &NewSyncHistory {
                session_id: session_id.to_string(),
                repository: repo.full_name.clone(),
                data_type,
                new_count: counts.new,
                updated_count: counts.updated,
                unchanged_count: counts.unchanged,
                pages_fetched,
                status,
                error_message: error.clone(),
                error_kind: error_kind.clone(),
                duration_ms,
            },
        )
        .await?;
        self.set_phase(repo, data_type, SyncPhase::Recorded).await;

        log::info!(
            "[sync] {} {} {}: {} new, {} updated, {} unchanged ({} pages)",
            repo.full_name,
            data_type,
            status,
            counts.new,
            counts.updated,
            counts.unchanged,
            pages_fetched
        );

        Ok(OperationResult {
            repository: repo.full_name.clone(),
            data_type,
            status,
            counts,
            pages_fetched,
            error,
            error_kind,
            duration_ms,
        })
    }

    async fn fetch_page(
        &self,
        repo: &Repository,
        data_type: DataType,
        page: u32,
    ) -> Result<FetchedPage, GitHubError> {
        let per_page = self.settings.per_page;
        match data_type {
            DataType::Issues => self
                .client
                .fetch_issues(&repo.owner, &repo.name, page, per_page)
                .await
                .map(FetchedPage::Issues),
            DataType::Prs => self
                .client
                .fetch_pull_requests(&repo.owner, &repo.name, page, per_page)
                .await
                .map(FetchedPage::PullRequests),
        }
    }

    /// Reconcile every item of a page; item failures are collected, not fatal.
    async fn reconcile_page(
        &self,
        full_name: &str,
        fetched: &FetchedPage,
        counts: &mut ReconcileCounts,
        errors: &mut Vec<AppError>,
    ) {
        let mut handle = |result: Result<reconcile::ReconcileOutcome, AppError>| match result {
            Ok(outcome) => counts.record(outcome),
            Err(e) => {
                log::warn!("[sync] {}", e);
                errors.push(e);
            }
        };

        match fetched {
            FetchedPage::Issues(page) => {
                for issue in &page.items {
                    handle(reconcile::reconcile_issue(&self.pool, full_name, issue).await);
                }
            }
            FetchedPage::PullRequests(page) => {
                for pr in &page.items {
                    handle(reconcile::reconcile_pull_request(&self.pool, full_name, pr).await);
                }
            }
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
