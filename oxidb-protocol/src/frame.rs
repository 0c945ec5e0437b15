//! Length-prefixed frame format.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+----------------------------------+
//! | payload_len    | payload                          |
//! | 4 bytes, u32LE | payload_len bytes of UTF-8 JSON  |
//! +----------------+----------------------------------+
//! ```
//!
//! There is no magic, version, request id or checksum. A frame is delimited by
//! its length alone, and the client does not cap that length.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame payload (serialized JSON text).
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Creates a new frame from a JSON-serializable value.
    pub fn from_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(crate::value::to_wire(value)?))
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let len = payload_len(&self.payload)?;
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + self.payload.len());
        buf.put_u32_le(len);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from a buffer.
    ///
    /// Returns `Some(frame)` and consumes its bytes once a complete frame is
    /// buffered, or `None` (consuming nothing) if more data is needed.
    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if buf.len() < LENGTH_PREFIX_SIZE + len {
            return None;
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        Some(Self::new(buf.split_to(len).freeze()))
    }
}

fn payload_len(payload: &[u8]) -> Result<u32, ProtocolError> {
    u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: payload.len(),
    })
}

/// Writes one frame and flushes the writer.
///
/// The prefix and payload go out in a single buffer so a frame is never
/// interleaved with a partial write. Returns the number of bytes written.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<usize, ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = payload_len(payload)?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(buf.len())
}

/// Reads exactly one frame and returns its payload.
///
/// Blocks until the 4-byte prefix and then exactly that many payload bytes
/// have arrived. A stream that ends before either read completes yields
/// [`ProtocolError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = u32::from_le_bytes(prefix) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}
