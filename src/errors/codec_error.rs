use thiserror::Error;

/// Decoding failure for an inbound frame.
///
/// Malformed frames are dropped with a warning; they never tear a leg down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Frame body is not valid JSON or lacks required fields
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame is valid JSON but has no discriminator field
    #[error("Missing `{0}` discriminator")]
    MissingDiscriminator(&'static str),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
