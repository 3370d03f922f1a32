use std::sync::Arc;

use dotenv::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;

use ccr::api;
use ccr::config::CcrConfig;
use ccr::state::AppState;
use ccr::store::CheckpointStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = CcrConfig::from_env();
    std::fs::create_dir_all(&config.store_path)?;
    std::fs::create_dir_all(&config.scratch_path)?;

    let pool = SqlitePoolOptions::new().connect(&config.db_url).await?;
    let store = CheckpointStore::init(pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, store));
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("ccr listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("shutting down");
}
