//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use camscout_core::RegistryError;
use camscout_discovery::subnet::is_viable_interface;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn registry_error(e: RegistryError) -> axum::response::Response {
    let status = match e {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists(_) | RegistryError::IdentityChanged { .. } => {
            StatusCode::CONFLICT
        }
        RegistryError::InvalidName(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(ApiError::new(e.to_string()))).into_response()
}

/// List all registered devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.devices().await)
}

/// Get a specific device by name
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_device(&name).await {
        Ok(device) => Json(device).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Remove a device from the registry
pub async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    info!(device = %name, "Remove device requested");

    match state.registry.remove_device(&name).await {
        Ok(_) => Json(serde_json::json!({
            "status": "removed",
            "device": name
        }))
        .into_response(),
        Err(e) => registry_error(e),
    }
}

/// Run a discovery pass and return the newly registered devices
pub async fn trigger_discovery(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual discovery triggered");
    let added = state.discover().await;
    Json(serde_json::json!({
        "status": "completed",
        "devices_added": added.len(),
        "devices": added
    }))
}

/// Run one status check cycle immediately
pub async fn check_statuses(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual status check triggered");
    let checked = state.scanner.check_statuses().await;
    Json(serde_json::json!({
        "status": "completed",
        "devices_checked": checked
    }))
}

/// Current discovery and status configuration (credentials are never exposed)
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "discovery": state.config.discovery,
        "status": state.config.status,
    }))
}

/// Network interface info
#[derive(Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
    pub subnet: String,
    pub prefix_len: u8,
    /// Whether discovery would use this interface
    pub viable: bool,
}

/// List IPv4 interfaces and whether discovery uses them
pub async fn list_interfaces() -> impl IntoResponse {
    let interfaces: Vec<NetworkInterface> = datalink::interfaces()
        .into_iter()
        .flat_map(|iface| {
            let viable = is_viable_interface(&iface);
            iface
                .ips
                .iter()
                .filter_map(|ip| match ip {
                    IpNetwork::V4(net) => Some(NetworkInterface {
                        name: iface.name.clone(),
                        ip: net.ip().to_string(),
                        subnet: net.network().to_string(),
                        prefix_len: net.prefix(),
                        viable,
                    }),
                    IpNetwork::V6(_) => None,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    debug!(count = interfaces.len(), "Listed interfaces");
    Json(interfaces)
}
