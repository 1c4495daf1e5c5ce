//! flowd service entry point: resume active poll loops and run until
//! shutdown.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flowd::{Config, NodeRegistry, PollSupervisor, SqliteStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    let store = match SqliteStore::open(&config.storage.database_path) {
        Ok(store) => store,
        Err(e) => {
            error!("failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(NodeRegistry::new());
    let supervisor = PollSupervisor::new(store, registry, config);

    match supervisor.resume_active().await {
        Ok(count) => info!("flowd started, {} poll loop(s) resumed", count),
        Err(e) => error!("failed to resume poll loops: {}", e),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }

    info!("shutdown signal received");
    supervisor.stop_all().await;
}
