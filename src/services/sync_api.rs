//! REST API routes for the sync service.
//!
//! Trigger, status, and history endpoints for the sync engine, repository
//! management, and scheduler control. Triggers are synchronous: the response
//! is sent when the pass finishes.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::repository::{self, NewRepository, Repository, RepositoryUpdate};
use crate::models::sync_history::{self, DataType, SyncHistory};
use crate::services::github_client::RateLimitInfo;
use crate::services::http_server::ApiErr;
use crate::services::scheduler::{Scheduler, SchedulerStatus};
use crate::services::sync_engine::{EngineStatus, SyncEngine, SyncReport, SyncScope};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of history rows returned.
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Shared state for the sync service routes.
#[derive(Clone)]
pub struct SyncState {
    pub db: DbPool,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<Scheduler>,
}

// ── Request / response types ─────────────────────────────────────────────────

/// Body of `POST /api/sync`.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    /// `all` (default) or `repository`.
    #[serde(default)]
    pub scope: Option<String>,
    pub repository: Option<String>,
    pub data_type: Option<DataType>,
}

impl TriggerRequest {
    pub fn into_scope(self) -> Result<SyncScope, AppError> {
        match self.scope.as_deref().unwrap_or("all") {
            "all" => Ok(SyncScope::All),
            "repository" => {
                let repository = self.repository.ok_or_else(|| {
                    AppError::invalid_input_field("repository is required", "repository")
                })?;
                repository::split_full_name(&repository)?;
                Ok(match self.data_type {
                    Some(data_type) => SyncScope::RepositoryDataType {
                        repository,
                        data_type,
                    },
                    None => SyncScope::Repository { repository },
                })
            }
            other => Err(AppError::invalid_input_field(
                format!("Unknown scope '{}'", other),
                "scope",
            )),
        }
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    repository: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SyncStatusResponse {
    engine: EngineStatus,
    authenticated: bool,
    max_pages: u32,
    rate_limit: RateLimitInfo,
}

// ── Routes ───────────────────────────────────────────────────────────────────

pub fn sync_api_routes() -> Router<SyncState> {
    Router::new()
        .route("/api/sync", post(trigger_sync_handler))
        .route("/api/sync/status", get(get_sync_status_handler))
        .route("/api/sync/history", get(get_sync_history_handler))
        .route(
            "/api/repositories",
            get(list_repositories_handler).post(create_repository_handler),
        )
        .route(
            "/api/repositories/{owner}/{name}",
            get(get_repository_handler)
                .put(update_repository_handler)
                .delete(delete_repository_handler),
        )
        .route("/api/scheduler", get(get_scheduler_handler))
        .route("/api/scheduler/enable", post(enable_scheduler_handler))
        .route("/api/scheduler/disable", post(disable_scheduler_handler))
}

// ── Sync handlers ────────────────────────────────────────────────────────────

/// POST /api/sync: Run a sync and return its report (409 while one runs).
async fn trigger_sync_handler(
    State(state): State<SyncState>,
    body: Bytes,
) -> Result<Json<SyncReport>, ApiErr> {
    let request: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::invalid_input(format!("Invalid request body: {}", e)))?
    };
    let scope = request.into_scope()?;
    log::info!("[http] Sync triggered: {:?}", scope);
    let report = state.engine.trigger(scope).await?;
    Ok(Json(report))
}

/// GET /api/sync/status: Engine state and last observed rate limit.
async fn get_sync_status_handler(
    State(state): State<SyncState>,
) -> Result<Json<SyncStatusResponse>, ApiErr> {
    Ok(Json(SyncStatusResponse {
        engine: state.engine.status().await,
        authenticated: state.engine.is_authenticated(),
        max_pages: state.engine.max_pages(),
        rate_limit: state.engine.rate_limit(),
    }))
}

/// GET /api/sync/history?repository=&limit=
async fn get_sync_history_handler(
    State(state): State<SyncState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<SyncHistory>>, ApiErr> {
    let rows = sync_history::list_sync_history(
        &state.db,
        params.repository.as_deref(),
        params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
    )
    .await?;
    Ok(Json(rows))
}

// ── Repository handlers ──────────────────────────────────────────────────────

/// GET /api/repositories: Every monitored repository, active or not.
async fn list_repositories_handler(
    State(state): State<SyncState>,
) -> Result<Json<Vec<Repository>>, ApiErr> {
    Ok(Json(repository::list_repositories(&state.db, false).await?))
}

/// POST /api/repositories
async fn create_repository_handler(
    State(state): State<SyncState>,
    Json(input): Json<NewRepository>,
) -> Result<(StatusCode, Json<Repository>), ApiErr> {
    let repo = repository::create_repository(&state.db, &input).await?;
    log::info!("[http] Added repository {}", repo.full_name);
    Ok((StatusCode::CREATED, Json(repo)))
}

/// GET /api/repositories/{owner}/{name}
async fn get_repository_handler(
    State(state): State<SyncState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Repository>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let repo = repository::get_repository(&state.db, &full_name)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("Repository", full_name))?;
    Ok(Json(repo))
}

/// PUT /api/repositories/{owner}/{name}
async fn update_repository_handler(
    State(state): State<SyncState>,
    Path((owner, name)): Path<(String, String)>,
    Json(update): Json<RepositoryUpdate>,
) -> Result<Json<Repository>, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    let repo = repository::update_repository(&state.db, &full_name, &update).await?;
    Ok(Json(repo))
}

/// DELETE /api/repositories/{owner}/{name}: Stops future syncs; history stays.
async fn delete_repository_handler(
    State(state): State<SyncState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiErr> {
    let full_name = format!("{}/{}", owner, name);
    repository::delete_repository(&state.db, &full_name).await?;
    log::info!("[http] Removed repository {}", full_name);
    Ok(StatusCode::NO_CONTENT)
}

// ── Scheduler handlers ───────────────────────────────────────────────────────

async fn get_scheduler_handler(State(state): State<SyncState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

async fn enable_scheduler_handler(State(state): State<SyncState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.enable().await)
}

async fn disable_scheduler_handler(State(state): State<SyncState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.disable().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(scope: Option<&str>, repository: Option<&str>, data_type: Option<DataType>) -> TriggerRequest {
        TriggerRequest {
            scope: scope.map(String::from),
            repository: repository.map(String::from),
            data_type,
        }
    }

    #[test]
    fn test_trigger_request_scopes() {
        assert_eq!(TriggerRequest::default().into_scope().unwrap(), SyncScope::All);
        assert_eq!(
            request(Some("repository"), Some("o/r"), None).into_scope().unwrap(),
            SyncScope::Repository {
                repository: "o/r".to_string()
            }
        );
        assert_eq!(
            request(Some("repository"), Some("o/r"), Some(DataType::Issues))
                .into_scope()
                .unwrap(),
            SyncScope::RepositoryDataType {
                repository: "o/r".to_string(),
                data_type: DataType::Issues
            }
        );
    }

    #[test]
    fn test_trigger_request_rejects_bad_input() {
        assert!(request(Some("repository"), None, None).into_scope().is_err());
        assert!(request(Some("repository"), Some("nope"), None).into_scope().is_err());
        assert!(request(Some("everything"), None, None).into_scope().is_err());
    }

    #[test]
    fn test_trigger_request_json() {
        let req: TriggerRequest =
            serde_json::from_str(r#"{"scope":"repository","repository":"o/r","data_type":"prs"}"#)
                .unwrap();
        assert_eq!(req.data_type, Some(DataType::Prs));
    }
}
