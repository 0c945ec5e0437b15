//! Encoder and incremental decoder for OxiDB frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Request, Response};
use bytes::BytesMut;
use serde::de::DeserializeOwned;

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        Frame::from_json(request)?.encode()
    }

    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Frame::from_json(response)?.encode()
    }

    /// Encodes any JSON-serializable value into a frame.
    pub fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<BytesMut, ProtocolError> {
        Frame::from_json(value)?.encode()
    }
}

/// Accumulates stream bytes and yields complete messages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Takes the next complete frame, if one is buffered.
    pub fn decode_frame(&mut self) -> Option<Frame> {
        Frame::decode(&mut self.buffer)
    }

    /// Decodes the next frame payload as an arbitrary JSON type.
    pub fn decode_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        match self.decode_frame() {
            Some(frame) => Ok(Some(crate::value::from_wire(&frame.payload)?)),
            None => Ok(None),
        }
    }

    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        self.decode_json()
    }

    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        match self.decode_frame() {
            Some(frame) => Ok(Some(Response::decode(&frame.payload)?)),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
