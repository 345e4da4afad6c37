//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/devices", get(api::list_devices))
        .route(
            "/api/devices/{name}",
            get(api::get_device).delete(api::remove_device),
        )
        .route("/api/discover", post(api::trigger_discovery))
        .route("/api/status/check", post(api::check_statuses))
        .route("/api/config", get(api::get_config))
        .route("/api/interfaces", get(api::list_interfaces))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server with the status task and optional periodic discovery
/// until ctrl-c
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    let status_task = state.config.status.enabled.then(|| {
        state
            .scanner
            .spawn_status_task(Duration::from_secs(state.config.status.interval_secs))
    });

    let discovery_task = (state.config.discovery.interval_secs > 0).then(|| {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(state.config.discovery.interval_secs));
            loop {
                ticker.tick().await;
                state.discover().await;
            }
        })
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting web server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = discovery_task {
        task.abort();
    }
    if let Some(task) = status_task {
        task.stop().await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
