//! WebSocket entrypoint and connection handler.
//!
//! Upgrades HTTP to WS and runs one control loop per connection.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, error, info, warn};

use aerodesk_core::ClientSignal;

use crate::connection_manager::client_channel;
use crate::server::GatewayState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = client_channel();

    let connection_id = state.manager.connect(tx).await;

    // Forward outbound events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Receive signals and route them to the manager
    let manager = state.manager.clone();
    let recv_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match ClientSignal::parse(&text) {
                    Ok(signal) => manager.handle_signal(&recv_id, signal).await,
                    Err(e) => {
                        warn!(connection_id = %recv_id, error = %e, "Ignoring malformed signal")
                    }
                },
                Message::Close(_) => break,
                _ => debug!("Ignoring non-text frame"),
            }
        }
    });

    // If either task exits, abort the other.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.manager.disconnect(&connection_id).await;
    info!(connection_id = %connection_id, "WebSocket connection closed");
}
