//! HTTP and WebSocket request handlers
//!
//! - `api` - health check, public URL, call-setup document and tool listing
//! - `relay` - telephony and observer WebSocket legs

pub mod api;
pub mod relay;

pub use relay::{call_handler, logs_handler, unknown_path_handler};
