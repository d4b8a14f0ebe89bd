use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::errors::codec_error::{CodecError, CodecResult};

// =============================================================================
// Inbound
// =============================================================================

/// Decoded telephony frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    /// Stream started; carries the provider's stream id
    Start { stream_sid: String },

    /// One chunk of caller audio
    Media {
        /// Offset of this chunk from stream start, in milliseconds
        timestamp_ms: u64,
        /// Opaque audio payload, forwarded untouched
        payload: String,
    },

    /// The caller hung up
    Close,

    /// Well-formed frame of a type the relay does not act on
    /// (`connected`, `mark`, `stop`, `dtmf`, ...)
    Ignored { event: String },
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    start: Option<StartPayload>,
    #[serde(default)]
    media: Option<MediaPayload>,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: u64,
    payload: String,
}

/// Accepts the timestamp as a JSON number or a numeric string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Integer(u64),
        Float(f64),
        Text(String),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Integer(ms) => Ok(ms),
        Timestamp::Float(ms) if ms.is_finite() && ms >= 0.0 => Ok(ms as u64),
        Timestamp::Float(ms) => Err(de::Error::custom(format!("invalid timestamp {ms}"))),
        Timestamp::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("invalid timestamp {text:?}"))),
    }
}

/// Decode one inbound telephony text frame.
pub fn decode_telephony_event(text: &str) -> CodecResult<TelephonyEvent> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    match frame.event.as_str() {
        "start" => {
            let start = frame
                .start
                .ok_or_else(|| CodecError::Malformed("start frame without `start`".to_string()))?;
            Ok(TelephonyEvent::Start {
                stream_sid: start.stream_sid,
            })
        }
        "media" => {
            let media = frame
                .media
                .ok_or_else(|| CodecError::Malformed("media frame without `media`".to_string()))?;
            Ok(TelephonyEvent::Media {
                timestamp_ms: media.timestamp,
                payload: media.payload,
            })
        }
        "close" => Ok(TelephonyEvent::Close),
        _ => Ok(TelephonyEvent::Ignored { event: frame.event }),
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Frame sent to the telephony leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    /// Play a chunk of model audio
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Playback position marker following each media chunk
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },

    /// Discard any audio queued for playback
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TelephonyOutbound {
    pub fn media(stream_sid: &str, payload: impl Into<String>) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: &str) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}
