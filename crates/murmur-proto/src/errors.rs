//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire data.
///
/// Every variant describes input that must be dropped at the boundary. None
/// of them is fatal for the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input is not valid JSON or does not match the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Frame exceeds [`crate::MAX_FRAME_LEN`].
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// JSON object has no string `type` discriminator.
    #[error("missing frame type discriminator")]
    MissingType,

    /// Discriminator names a frame this client does not understand.
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// A field is present but violates its constraints.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Wire name of the field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Timestamp is neither epoch milliseconds nor a parseable ISO-8601 string.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
