//! Realtime model WebSocket message types.
//!
//! All events are JSON objects discriminated by `type`.
//!
//! Client events (sent to the model):
//! - session.update - Apply session configuration
//! - input_audio_buffer.append - Append caller audio
//! - conversation.item.truncate - Cut an assistant item at a playback offset
//! - conversation.item.create - Return a function call result
//! - response.create - Ask for a new response
//!
//! Server events the relay acts on:
//! - input_audio_buffer.speech_started - Caller started speaking
//! - response.audio.delta - Audio chunk for the caller
//! - response.output_item.done - Output item finished (function calls)
//! - error - Error reported by the model
//!
//! Every other server event is mirrored to the observer untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::codec_error::{CodecError, CodecResult};

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Apply session configuration
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },

    /// Append caller audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Truncate an assistant item at the point playback was interrupted
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Request a new response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Result of a function call, keyed by the model's call id.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "function_call_output".to_string(),
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }
}

/// Conversation item created by the relay.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub call_id: String,
    pub output: String,
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Caller speech detected
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio chunk for the caller
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        /// Opaque audio payload, forwarded untouched
        delta: String,
    },

    /// Output item finished
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: Option<String>,
        item: OutputItem,
    },

    /// Error reported by the model
    #[serde(rename = "error")]
    Error { error: ApiError },

    /// Known type whose body did not match the expected shape
    #[serde(skip_deserializing)]
    Unrecognized { event_type: String, reason: String },

    /// Any other well-formed event
    #[serde(other)]
    Other,
}

/// Output item carried by `response.output_item.done`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded argument object, as sent by the model
    pub arguments: String,
}

impl OutputItem {
    /// The function call this item describes, if it is one.
    ///
    /// A call without a `call_id` or `name` cannot be answered and yields
    /// `None`. Missing arguments are passed on as an empty string so dispatch
    /// reports them as invalid JSON.
    pub fn function_call(&self) -> Option<FunctionCall> {
        if self.item_type != "function_call" {
            return None;
        }
        Some(FunctionCall {
            call_id: self.call_id.clone()?,
            name: self.name.clone()?,
            arguments: self.arguments.clone().unwrap_or_default(),
        })
    }
}

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Decode one model text frame.
///
/// Fails only when the frame is not a JSON object with a string `type`; such
/// frames are dropped entirely. Any other frame decodes, falling back to
/// [`ServerEvent::Unrecognized`] when a known type has an unexpected body.
pub fn decode_server_event(text: &str) -> CodecResult<ServerEvent> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingDiscriminator("type"))?
        .to_string();

    match ServerEvent::deserialize(value) {
        Ok(event) => Ok(event),
        Err(e) => Ok(ServerEvent::Unrecognized {
            event_type,
            reason: e.to_string(),
        }),
    }
}

// =============================================================================
// Observer Commands
// =============================================================================

/// Frame received from the observer.
///
/// Observers speak the model protocol; frames are forwarded to the model
/// verbatim. A `session.update` additionally replaces the saved session
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverCommand {
    pub event_type: Option<String>,
    pub session_update: Option<Value>,
}

/// Decode one observer text frame. Fails when the frame is not valid JSON.
pub fn decode_observer_command(text: &str) -> CodecResult<ObserverCommand> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    let session_update = match event_type.as_deref() {
        Some("session.update") => value.get_mut("session").map(Value::take),
        _ => None,
    };

    Ok(ObserverCommand {
        event_type,
        session_update,
    })
}
