//! WebSocket entry points for the telephony and observer legs
//!
//! Each accepted socket is split: the write half becomes a [`PeerHandle`]
//! owned by the orchestrator, the read half is pumped into the relay as
//! frame events until the socket closes.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::connection::{Leg, PeerHandle, PeerTransport, TransportError, next_inbound};
use crate::core::relay::RelayHandle;
use crate::state::AppState;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Telephony media stream WebSocket handler
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state holding the relay handle and credential
///
/// # Returns
/// * `Response` - HTTP response that upgrades the connection to WebSocket
pub async fn call_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Telephony WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_call_socket(socket, state))
}

/// Observer WebSocket handler
pub async fn logs_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Observer WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_logs_socket(socket, state))
}

/// Fallback for unknown paths
///
/// WebSocket upgrades are accepted and closed immediately; plain HTTP
/// requests get 404.
pub async fn unknown_path_handler(
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => {
            warn!(path = %uri.path(), "WebSocket upgrade on unknown path, closing");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            })
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_call_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let peer = PeerHandle::spawn(Leg::Telephony, AxumTransport { sink });
    info!(peer_id = %peer.id(), "Telephony WebSocket connection established");

    if let Err(e) = state
        .relay
        .connect_telephony(peer.clone(), state.credential())
        .await
    {
        error!("Failed to register telephony leg: {}", e);
        return;
    }

    pump_inbound(peer, stream, &state.relay).await;
}

async fn handle_logs_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let peer = PeerHandle::spawn(Leg::Observer, AxumTransport { sink });
    info!(peer_id = %peer.id(), "Observer WebSocket connection established");

    if let Err(e) = state.relay.connect_observer(peer.clone()).await {
        error!("Failed to register observer leg: {}", e);
        return;
    }

    pump_inbound(peer, stream, &state.relay).await;
}

/// Forward text frames from a socket into the relay until it closes or the
/// peer is terminated.
async fn pump_inbound(peer: PeerHandle, mut stream: SplitStream<WebSocket>, relay: &RelayHandle) {
    let leg = peer.leg();
    let mut reason = None;

    while let Some(message) = next_inbound(&peer, &mut stream).await {
        match message {
            Ok(Message::Text(text)) => {
                if relay.frame(leg, peer.id(), text.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                debug!(%leg, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(frame)) => {
                debug!(%leg, ?frame, "Received close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%leg, peer_id = %peer.id(), "WebSocket error: {}", e);
                reason = Some(e.to_string());
                break;
            }
        }
    }

    peer.mark_closed();
    info!(%leg, peer_id = %peer.id(), "WebSocket connection closed");
    let _ = relay.disconnected(leg, peer.id(), reason).await;
}

struct AxumTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl PeerTransport for AxumTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Close(e.to_string()))?;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
