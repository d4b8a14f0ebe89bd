//! Realtime model leg.
//!
//! The model speaks a JSON event protocol over WebSocket. This module holds
//! the wire types, the session configuration applied on connect, and the
//! connector that opens the leg.
//!
//! # Audio Format
//!
//! Audio is exchanged as base64 mu-law (`g711_ulaw`) in both directions so
//! telephony payloads pass through without transcoding.

pub mod config;
pub mod connector;
pub mod messages;

pub use config::{
    DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL, build_model_url, default_session_config,
    merge_session_config,
};
pub use connector::{ModelConnection, ModelConnector, OpenAIRealtimeConnector};
pub use messages::{
    ClientEvent, FunctionCall, ObserverCommand, ServerEvent, decode_observer_command,
    decode_server_event,
};
