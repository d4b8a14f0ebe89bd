//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::{call_handler, logs_handler, unknown_path_handler};
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoints
///
/// - `GET /call` - telephony media stream (one active call at a time; a new
///   connection supersedes the previous call)
/// - `GET /logs` - observer mirror of model traffic; frames sent here are
///   forwarded to the model and `session.update` overrides are remembered
///
/// Sub-paths of both prefixes route to the same leg. WebSocket upgrades on
/// any other path are accepted and closed immediately; plain HTTP requests
/// to unknown paths get 404.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/call", get(call_handler))
        .route("/call/{*rest}", get(call_handler))
        .route("/logs", get(logs_handler))
        .route("/logs/{*rest}", get(logs_handler))
        .fallback(unknown_path_handler)
        .layer(TraceLayer::new_for_http())
}
