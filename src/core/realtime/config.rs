//! Realtime model endpoint and session configuration.

use serde_json::{Value, json};
use tracing::warn;
use url::Url;

use crate::errors::relay_error::{RelayError, RelayResult};

/// Realtime model WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Model requested when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Audio format used on both directions of the call
pub const TELEPHONY_AUDIO_FORMAT: &str = "g711_ulaw";

/// Session configuration applied to every new model connection.
///
/// Matches the telephony leg: server-side turn detection and mu-law audio in
/// both directions.
pub fn default_session_config() -> Value {
    json!({
        "modalities": ["text", "audio"],
        "turn_detection": { "type": "server_vad" },
        "voice": "ash",
        "input_audio_transcription": { "model": "whisper-1" },
        "input_audio_format": TELEPHONY_AUDIO_FORMAT,
        "output_audio_format": TELEPHONY_AUDIO_FORMAT,
    })
}

/// Merge the observer's saved configuration over the defaults.
///
/// The merge is shallow: each top-level key in `saved` replaces the default
/// value wholesale. A saved value that is not an object is ignored.
pub fn merge_session_config(saved: Option<&Value>) -> Value {
    let mut config = default_session_config();

    match saved {
        None => {}
        Some(Value::Object(overrides)) => {
            if let Value::Object(base) = &mut config {
                for (key, value) in overrides {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        Some(other) => {
            warn!(
                "Ignoring saved session configuration that is not an object: {}",
                other
            );
        }
    }

    config
}

/// Build the model endpoint URL with the `model` query parameter.
pub fn build_model_url(base_url: &str, model: &str) -> RelayResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| RelayError::InvalidConfiguration(format!("model URL {base_url:?}: {e}")))?;

    match url.scheme() {
        "ws" | "wss" => {}
        scheme => {
            return Err(RelayError::InvalidConfiguration(format!(
                "model URL must use ws or wss, got {scheme}"
            )));
        }
    }

    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}
