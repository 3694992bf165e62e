// discussion-classifier/src/server.rs

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::config::Config;
use crate::jobs::{JobHandler, JobQueue};
use crate::shared_state::SharedState;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing(&cfg.log_level);
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let queue_config = cfg.queue_config();
    let shared_state = Arc::new(SharedState::from_config(cfg)?);
    info!(
        "Classification database ready at {}",
        shared_state.config.database_path.display()
    );

    let handler: Arc<dyn JobHandler> = shared_state.processor.clone();
    let queue = Arc::new(JobQueue::start(handler, queue_config));
    let app = build_router(AppState::new(shared_state, queue.clone()));

    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.shutdown().await,
        Err(_) => warn!("Job queue still referenced at shutdown; workers left running"),
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
