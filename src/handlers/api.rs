use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::error;
use url::Url;

use crate::core::functions::FunctionSchema;
use crate::state::AppState;

/// Path the telephony provider streams call media to.
pub const CALL_STREAM_PATH: &str = "/call";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUrlResponse {
    pub public_url: String,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

pub async fn public_url(State(state): State<Arc<AppState>>) -> Json<PublicUrlResponse> {
    Json(PublicUrlResponse {
        public_url: state.config.public_url.clone(),
    })
}

/// Call-setup document pointing the telephony provider at the media stream.
pub async fn twiml(State(state): State<Arc<AppState>>) -> Response {
    match call_stream_url(&state.config.public_url) {
        Some(url) => (
            [(header::CONTENT_TYPE, "text/xml")],
            render_call_document(url.as_str()),
        )
            .into_response(),
        None => {
            error!(
                public_url = %state.config.public_url,
                "Cannot build call stream URL from public URL"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PUBLIC_URL is not configured",
            )
                .into_response()
        }
    }
}

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<FunctionSchema>> {
    Json(state.functions.schemas())
}

/// Rewrite the public base URL into the WebSocket URL of the call stream.
///
/// `https`/`wss` bases map to `wss`, `http`/`ws` bases to `ws`. Returns
/// `None` for empty, unparsable or otherwise-schemed URLs.
pub fn call_stream_url(public_url: &str) -> Option<Url> {
    let mut url = Url::parse(public_url.trim()).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path(CALL_STREAM_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

fn render_call_document(stream_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say>Connected</Say>
  <Connect>
    <Stream url="{}" />
  </Connect>
  <Say>Disconnected</Say>
</Response>
"#,
        escape_xml_attr(stream_url)
    )
}

fn escape_xml_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
