//! Provost server — application entry point.

use provost_db::{DbConfig, DbManager};
use provost_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("provost=info".parse().unwrap()),
        )
        .json()
        .init();

    tracing::info!("Starting provost server...");

    let engine_config = EngineConfig::from_env();
    tracing::info!(
        commit = %engine_config.commit,
        batch_size = engine_config.batch_size,
        "engine configuration loaded"
    );

    let db_config = DbConfig {
        url: std::env::var("PROVOST_DB_URL").unwrap_or_else(|_| DbConfig::default().url),
        ..DbConfig::default()
    };
    let db = match DbManager::connect(&db_config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "database connection failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = provost_db::run_migrations(db.client()).await {
        tracing::error!(error = %e, "database migration failed");
        std::process::exit(1);
    }

    // TODO: mount the tenant and update HTTP controllers once the
    // routing layer lands.

    tracing::info!("provost server stopped.");
}
