//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or (de)serializing messages.
///
/// There are no structured error codes in this protocol: server-side failures
/// travel inside a well-formed envelope and are not protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended before a length prefix or a full payload was read.
    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("frame too large: {size} bytes does not fit a 32-bit length prefix")]
    FrameTooLarge { size: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("invalid response envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid base64 content: {0}")]
    InvalidBase64(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        // read_exact reports a short stream as UnexpectedEof
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(err)
        }
    }
}
