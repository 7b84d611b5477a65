//! Sync service: on-demand and daily sync of monitored repositories.

use repo_radar::config::AppConfig;
use repo_radar::error::AppError;
use repo_radar::logging::{self, LogFormat};
use repo_radar::models::repository;
use repo_radar::services::http_server::{self, cancel_on_ctrl_c, health_routes, with_frontend};
use repo_radar::services::sync_api::{sync_api_routes, SyncState};
use repo_radar::services::{GitHubClient, Scheduler, SyncEngine, SyncSettings, SystemClock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        log::error!("[sync-service] Fatal: {}", e);
        eprintln!("sync-service: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load().map_err(|e| AppError::config(e.to_string()))?;
    logging::init(&config.log_level, LogFormat::from(config.log_format.as_str()));

    let pool = repo_radar::db::initialize(&config.database_path)
        .await
        .map_err(|e| AppError::database_with_op(e.to_string(), "initialize"))?;

    let seeded = repository::seed_repositories(&pool, &config.repositories).await?;
    if seeded > 0 {
        log::info!("[sync-service] Seeded {} repositories from config", seeded);
    }

    let client = Arc::new(GitHubClient::new(&config.github)?);
    if !config.github.has_token() {
        log::warn!(
            "[sync-service] No GitHub token configured; running unauthenticated ({} pages per repository)",
            config.github.max_pages_unauthenticated
        );
    }

    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        client,
        SyncSettings::from(&config.github),
    ));
    let scheduler = Arc::new(Scheduler::new(
        engine.clone(),
        Arc::new(SystemClock),
        &config.scheduler,
    ));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let scheduler_task = scheduler.clone().spawn(cancel.clone());

    let state = SyncState {
        db: pool.clone(),
        engine,
        scheduler,
    };
    let app = sync_api_routes()
        .merge(health_routes())
        .with_state(state);
    let app = with_frontend(app, None)?;

    let served = http_server::serve(app, &config.sync_bind, "sync-service", cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        log::warn!("[sync-service] Scheduler task ended abnormally: {}", e);
    }
    pool.close().await;
    served
}
