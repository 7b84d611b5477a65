//! Shared HTTP plumbing for the sync service and the dashboard.
//!
//! Both binaries build an axum `Router`, optionally attach the static
//! front-end with a single-page-app fallback, and serve it until a
//! cancellation token fires.

use crate::error::AppError;
use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;

// ── Error handling ───────────────────────────────────────────────────────────

/// JSON error body.
#[derive(Serialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(pub AppError);

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::SyncInProgress { .. } => (StatusCode::CONFLICT, "SYNC_IN_PROGRESS"),
            AppError::Authentication { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            log::error!("[http] {}", self.0);
        }
        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<sqlx::Error> for ApiErr {
    fn from(err: sqlx::Error) -> Self {
        Self(AppError::from(err))
    }
}

// ── Router helpers ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

/// GET /health
pub fn health_routes<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new().route(
        "/health",
        get(|| async {
            Json(Health {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
            })
        }),
    )
}

/// Attach the front-end fallback.
///
/// Without a static directory every unmatched path is a 404. With one,
/// unmatched `/api/*` paths are still 404 and everything else is a static
/// file or `index.html`.
pub fn with_frontend(app: Router, static_dir: Option<&Path>) -> Result<Router, AppError> {
    let Some(dir) = static_dir else {
        return Ok(app.fallback(|| async { StatusCode::NOT_FOUND }));
    };

    let index_html: Arc<str> = std::fs::read_to_string(dir.join("index.html"))
        .map_err(|e| {
            AppError::config(format!(
                "Failed to read {}: {}",
                dir.join("index.html").display(),
                e
            ))
        })?
        .into();

    let dist = dir.to_path_buf();
    Ok(app.fallback(move |uri: Uri| {
        let html = index_html.clone();
        let dist = dist.clone();
        async move { spa_fallback(uri, &dist, &html).await }
    }))
}

/// API misses get a plain 404; other paths get a static file or `index.html`.
async fn spa_fallback(uri: Uri, dist: &Path, index_html: &str) -> Response {
    if uri.path().starts_with("/api/") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let req = match Request::builder().uri(&uri).body(Body::empty()) {
        Ok(req) => req,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match ServeDir::new(dist).oneshot(req).await {
        Ok(res) if res.status() != StatusCode::NOT_FOUND => res.into_response(),
        _ => Html(index_html.to_owned()).into_response(),
    }
}

/// Bind `addr` and serve `app` until `cancel` fires.
pub async fn serve(
    app: Router,
    addr: &str,
    name: &str,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind {}: {}", addr, e)))?;

    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| addr.to_string());
    log::info!("[http] {} listening on http://{}", name, local);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    log::info!("[http] {} stopped", name);
    Ok(())
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[http] Shutdown requested");
        }
        token.cancel();
    });
}
