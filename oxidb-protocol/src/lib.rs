//! # oxidb-protocol
//!
//! Wire protocol implementation for OxiDB.
//!
//! This crate provides:
//! - Length-prefixed framing (`[u32 LE length][UTF-8 JSON]`)
//! - The structured-value serializer and the base64 convention for binary content
//! - Request/Response envelope types and the command verbs
//! - Typed result shapes for responses with a fixed structure

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod value;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{read_frame, write_frame, Frame, LENGTH_PREFIX_SIZE};
pub use message::{
    AuthResult, BeginTxResult, Command, CompactResult, CountResult, GetObjectResult, ObjectMeta,
    Request, Response, SearchHit,
};
pub use value::{Map, Value};

/// Default port for oxidb-server.
pub const DEFAULT_PORT: u16 = 4444;

/// Default host for oxidb-server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Content type recorded for blob objects uploaded without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
