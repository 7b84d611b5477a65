//! Dashboard API server over the local mirror.

use repo_radar::config::AppConfig;
use repo_radar::error::AppError;
use repo_radar::logging::{self, LogFormat};
use repo_radar::services::dashboard_api::{cors_layer, dashboard_api_routes, DashboardState};
use repo_radar::services::http_server::{self, cancel_on_ctrl_c, health_routes, with_frontend};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        log::error!("[dashboard] Fatal: {}", e);
        eprintln!("dashboard: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load().map_err(|e| AppError::config(e.to_string()))?;
    logging::init(&config.log_level, LogFormat::from(config.log_format.as_str()));

    let pool = repo_radar::db::initialize(&config.database_path)
        .await
        .map_err(|e| AppError::database_with_op(e.to_string(), "initialize"))?;

    let app = dashboard_api_routes()
        .merge(health_routes())
        .layer(cors_layer())
        .with_state(DashboardState { db: pool.clone() });
    let app = with_frontend(app, config.static_dir.as_deref())?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let served = http_server::serve(app, &config.dashboard_bind, "dashboard", cancel).await;
    pool.close().await;
    served
}
