//! Client error types and the server-error classifier.

use crate::config::ConfigError;
use oxidb_protocol::{ProtocolError, Response};
use std::time::Duration;
use thiserror::Error;

/// Message used when a failed envelope carries no `error` text.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("no response from server within {0:?}")]
    ReadTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// The server rejected the command.
    #[error("{0}")]
    Operation(String),

    /// The server rejected the command because of an optimistic-concurrency conflict.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("a transaction is already active on this connection")]
    TransactionAlreadyActive,

    /// A success payload did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ConnectionClosed => ClientError::ConnectionClosed,
            ProtocolError::Io(e) => ClientError::Io(e),
            other => ClientError::Protocol(other),
        }
    }
}

/// Classifies a server error message.
///
/// Any message containing "conflict" (case-insensitive) is a transaction
/// conflict; everything else is an ordinary operation error.
pub fn classify(message: impl Into<String>) -> ClientError {
    let message = message.into();
    if message.to_lowercase().contains("conflict") {
        ClientError::TransactionConflict(message)
    } else {
        ClientError::Operation(message)
    }
}

impl ClientError {
    /// Builds the error for a failed envelope.
    pub fn from_response(response: Response) -> Self {
        classify(response.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
    }

    /// Returns whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::TransactionConflict(_))
    }

    /// Returns whether the connection is unusable after this error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::ConnectTimeout { .. }
                | ClientError::ConnectionClosed
                | ClientError::ReadTimeout(_)
                | ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::TlsHandshake(_)
        )
    }

    /// Returns the server-reported message, if the server rejected the command.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Operation(msg) | ClientError::TransactionConflict(msg) => Some(msg),
            _ => None,
        }
    }
}
