//! Error types shared across the relay.
//!
//! - `relay_error`: transport, connection and event-loop failures
//! - `codec_error`: malformed frames on either wire protocol

pub mod codec_error;
pub mod relay_error;
