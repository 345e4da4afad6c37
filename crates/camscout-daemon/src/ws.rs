//! WebSocket stream of registry changes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use camscout_core::{RegisteredDevice, RegistryEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "device_added")]
    DeviceAdded(RegisteredDevice),
    #[serde(rename = "device_updated")]
    DeviceUpdated(RegisteredDevice),
    #[serde(rename = "device_removed")]
    DeviceRemoved { name: String },
    #[serde(rename = "pong")]
    Pong,
}

impl From<RegistryEvent> for WsMessage {
    fn from(event: RegistryEvent) -> Self {
        match event {
            RegistryEvent::DeviceAdded(device) => WsMessage::DeviceAdded(device),
            RegistryEvent::DeviceUpdated(device) => WsMessage::DeviceUpdated(device),
            RegistryEvent::DeviceRemoved(name) => WsMessage::DeviceRemoved { name },
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Current registry contents first
    for device in state.registry.devices().await {
        if !send(&mut sender, &WsMessage::DeviceAdded(device)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send(&mut sender, &WsMessage::from(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Registry event channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_encoding() {
        let device = RegisteredDevice::new("cam", "10.0.0.5", 80);
        let json = serde_json::to_value(WsMessage::from(RegistryEvent::DeviceAdded(device))).unwrap();
        assert_eq!(json["type"], "device_added");
        assert_eq!(json["data"]["name"], "cam");

        let json =
            serde_json::to_value(WsMessage::from(RegistryEvent::DeviceRemoved("cam".into()))).unwrap();
        assert_eq!(json["type"], "device_removed");
        assert_eq!(json["data"]["name"], "cam");
    }
}
