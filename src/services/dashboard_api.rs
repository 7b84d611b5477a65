//! REST API routes for the dashboard.
//!
//! Read-only views over the mirrored issues and pull requests, plus the two
//! annotation endpoints. Annotation columns (`triage`, `priority`) are written
//! here and nowhere else; the sync engine never touches them.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue::{self, AnnotationUpdate, Issue};
use crate::models::pull_request::{self, PullRequest};
use crate::models::query::{ItemFilter, Page};
use crate::models::repository::{self, Repository};
use crate::models::sync_history::{self, SyncHistory};
use crate::services::http_server::ApiErr;
use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_ERROR_LIMIT: i64 = 20;

/// Shared state for the dashboard routes.
#[derive(Clone)]
pub struct DashboardState {
    pub db: DbPool,
}

#[derive(Deserialize)]
struct ErrorsQuery {
    limit: Option<i64>,
}

/// A repository with its open item counts.
#[derive(Debug, Serialize)]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub repository: Repository,
    pub open_issues: i64,
    pub open_pull_requests: i64,
}

// ── Routes ───────────────────────────────────────────────────────────────────

pub fn dashboard_api_routes() -> Router<DashboardState> {
    Router::new()
        .route("/api/issues", get(list_issues_handler))
        .route(
            "/api/issues/{owner}/{name}/{number}",
            get(get_issue_handler),
        )
        .route(
            "/api/issues/{owner}/{name}/{number}/annotations",
            patch(annotate_issue_handler),
        )
        .route("/api/pulls", get(list_pulls_handler))
        .route("/api/pulls/{owner}/{name}/{number}", get(get_pull_handler))
        .route(
            "/api/pulls/{owner}/{name}/{number}/annotations",
            patch(annotate_pull_handler),
        )
        .route("/api/repositories", get(list_repositories_handler))
        .route("/api/sync/errors", get(list_sync_errors_handler))
}

/// CORS for a front-end served from another origin during development.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PATCH])
        .allow_headers(Any)
}

// ── Issue handlers ───────────────────────────────────────────────────────────

/// GET /api/issues?repository=&state=&label=&triage=&priority=&search=&category=&sort=&limit=&offset=
async fn list_issues_handler(
    State(state): State<DashboardState>,
    Query(filter): Query<ItemFilter>,
) -> Result<Json<Page<Issue>>, ApiErr> {
    Ok(Json(issue::list_issues(&state.db, &filter).await?))
}

async fn get_issue_handler(
    State(state): State<DashboardState>,
    Path((owner, name, number)): Path<(String, String, i64)>,
) -> Result<Json<Issue>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let found = issue::get_issue(&state.db, &full_name, number)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Issue", format!("{}#{}", full_name, number)))?;
    Ok(Json(found))
}

/// PATCH /api/issues/{owner}/{name}/{number}/annotations
async fn annotate_issue_handler(
    State(state): State<DashboardState>,
    Path((owner, name, number)): Path<(String, String, i64)>,
    Json(update): Json<AnnotationUpdate>,
) -> Result<Json<Issue>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let updated = issue::update_issue_annotations(&state.db, &full_name, number, &update).await?;
    log::debug!("[http] Annotated issue {}#{}", full_name, number);
    Ok(Json(updated))
}

// ── Pull request handlers ────────────────────────────────────────────────────

async fn list_pulls_handler(
    State(state): State<DashboardState>,
    Query(filter): Query<ItemFilter>,
) -> Result<Json<Page<PullRequest>>, ApiErr> {
    Ok(Json(pull_request::list_pull_requests(&state.db, &filter).await?))
}

async fn get_pull_handler(
    State(state): State<DashboardState>,
    Path((owner, name, number)): Path<(String, String, i64)>,
) -> Result<Json<PullRequest>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let found = pull_request::get_pull_request(&state.db, &full_name, number)
        .await?
        .ok_or_else(|| {
            AppError::not_found_with_id("Pull request", format!("{}#{}", full_name, number))
        })?;
    Ok(Json(found))
}

async fn annotate_pull_handler(
    State(state): State<DashboardState>,
    Path((owner, name, number)): Path<(String, String, i64)>,
    Json(update): Json<AnnotationUpdate>,
) -> Result<Json<PullRequest>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let updated =
        pull_request::update_pull_request_annotations(&state.db, &full_name, number, &update)
            .await?;
    log::debug!("[http] Annotated pull request {}#{}", full_name, number);
    Ok(Json(updated))
}

// ── Repository / sync handlers ───────────────────────────────────────────────

/// GET /api/repositories: Repositories with open issue and PR counts.
async fn list_repositories_handler(
    State(state): State<DashboardState>,
) -> Result<Json<Vec<RepositorySummary>>, ApiErr> {
    let repos = repository::list_repositories(&state.db, false).await?;
    let issues = counts_by_repository(issue::open_issue_counts(&state.db).await?);
    let pulls = counts_by_repository(pull_request::open_pull_request_counts(&state.db).await?);

    let summaries = repos
        .into_iter()
        .map(|repo| {
            let key = repo.full_name.to_lowercase();
            RepositorySummary {
                open_issues: issues.get(&key).copied().unwrap_or(0),
                open_pull_requests: pulls.get(&key).copied().unwrap_or(0),
                repository: repo,
            }
        })
        .collect();
    Ok(Json(summaries))
}

/// GET /api/sync/errors?limit=: Recent failed or partial sync operations.
async fn list_sync_errors_handler(
    State(state): State<DashboardState>,
    Query(params): Query<ErrorsQuery>,
) -> Result<Json<Vec<SyncHistory>>, ApiErr> {
    let rows =
        sync_history::recent_errors(&state.db, params.limit.unwrap_or(DEFAULT_ERROR_LIMIT)).await?;
    Ok(Json(rows))
}

/// Fold `(repository, count)` rows into a case-insensitive lookup.
fn counts_by_repository(rows: Vec<(String, i64)>) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for (repo, count) in rows {
        *map.entry(repo.to_lowercase()).or_insert(0) += count;
    }
    map
}
