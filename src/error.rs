//! Decoder error types (thiserror-based).

use thiserror::Error;

/// Engine return code for an invalid argument, `AVERROR(EINVAL)`.
///
/// When a decoder fails to open with this code the codec/hardware pairing is
/// unsupported, and negotiation moves on to the next candidate.
pub const INVALID_ARGUMENT: i32 = -ffmpeg_next::error::EINVAL;

/// Engine return code for "resource temporarily unavailable", `AVERROR(EAGAIN)`.
pub const TRY_AGAIN: i32 = -ffmpeg_next::error::EAGAIN;

/// Errors surfaced by a decode session.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Could not allocate {0}")]
    ResourceAllocation(&'static str),

    #[error("AVERROR {code}: {message}")]
    EngineCall { code: i32, message: String },

    #[error("No video stream found")]
    NoVideoStream,

    #[error("No decoder could be opened for this stream")]
    NoDecoderAvailable,

    #[error("Cannot seek a non-seekable source")]
    UnsupportedSeek,

    #[error("Decode session is closed")]
    Closed,

    #[error("Failed to open source: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecoderError {
    /// Build an [`DecoderError::EngineCall`] from a raw engine code and its text.
    pub fn engine(code: i32, message: impl Into<String>) -> Self {
        DecoderError::EngineCall {
            code,
            message: message.into(),
        }
    }

    /// Engine code carried by this error, if it came from an engine call.
    pub fn code(&self) -> Option<i32> {
        match self {
            DecoderError::EngineCall { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the engine rejected the call with an invalid-argument code.
    pub fn is_invalid_argument(&self) -> bool {
        self.code() == Some(INVALID_ARGUMENT)
    }
}

/// Convenience Result type for decoder operations.
pub type Result<T> = std::result::Result<T, DecoderError>;
