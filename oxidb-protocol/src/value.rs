//! Structured values and their wire text encoding.
//!
//! The only value type exchanged with the server is a JSON tree:
//! null, boolean, number, string, list or string-keyed map. Binary content is
//! never embedded raw; it travels as a standard-alphabet base64 string.

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use serde_json::{Map, Value};

/// Serializes a value into the UTF-8 JSON text carried by a frame.
pub fn to_wire<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Parses frame payload text back into a value.
pub fn from_wire<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(serde_json::from_str(text)?)
}

/// Encodes binary content for embedding in a structured value.
pub fn encode_binary(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes binary content previously embedded with [`encode_binary`].
pub fn decode_binary(text: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(text)
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))
}
