//! Telephony media-stream protocol.
//!
//! Inbound frames are JSON objects discriminated by `event` (`start`, `media`,
//! `close`); outbound frames carry the stream id as `streamSid`.

pub mod messages;

pub use messages::{TelephonyEvent, TelephonyOutbound, decode_telephony_event};
