//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering wire encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to encode a frame.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Failed to decode a frame received from the client.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Decode(err.to_string())
        } else {
            ProtocolError::Encode(err.to_string())
        }
    }
}
