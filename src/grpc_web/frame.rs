//! Length-prefixed message framing.
//!
//! ```text
//! [flags:1][length:4, big-endian][payload:length]
//! ```
//!
//! The high bit of `flags` marks a trailer frame; the low bit marks a
//! compressed payload. Native gRPC and grpc-web share this layout, so data
//! frames are re-emitted with their flags byte untouched.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::grpc_web::status::{Status, GRPC_MESSAGE, GRPC_STATUS};

/// Size of the flags byte plus the length prefix.
pub const HEADER_LEN: usize = 5;

/// Flag bit marking a trailer frame.
pub const TRAILER_FLAG: u8 = 0x80;

/// Flag bit marking a compressed payload.
pub const COMPRESSED_FLAG: u8 = 0x01;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("stream ended inside a frame ({0} bytes left over)")]
    Truncated(usize),

    #[error("frame payload of {0} bytes exceeds the 32-bit length prefix")]
    TooLarge(usize),

    #[error("malformed trailer line: {0}")]
    MalformedTrailer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Trailer,
}

/// A single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    flags: u8,
    payload: Bytes,
}

impl Frame {
    /// An uncompressed data frame.
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::with_flags(0, payload)
    }

    /// Build a frame from a raw flags byte, as read off the wire.
    pub fn with_flags(flags: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            flags,
            payload: payload.into(),
        }
    }

    /// The trailer frame for a call's final status and trailing metadata.
    pub fn trailer(status: &Status, metadata: &HeaderMap) -> Self {
        Self::with_flags(TRAILER_FLAG, encode_trailer_block(status, metadata))
    }

    pub fn kind(&self) -> FrameKind {
        if self.flags & TRAILER_FLAG != 0 {
            FrameKind::Trailer
        } else {
            FrameKind::Data
        }
    }

    pub fn is_trailer(&self) -> bool {
        self.kind() == FrameKind::Trailer
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Append the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| FrameError::TooLarge(self.payload.len()))?;
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u8(self.flags);
        dst.put_u32(len);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Wire form of this frame as a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Serialize status and trailing metadata as `key: value\r\n` lines.
///
/// `grpc-status` and `grpc-message` come first; any copies of those keys in
/// `metadata` are skipped so the block carries exactly one of each.
pub fn encode_trailer_block(status: &Status, metadata: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::new();
    write_line(&mut buf, GRPC_STATUS, status.code().as_i32().to_string().as_bytes());
    write_line(&mut buf, GRPC_MESSAGE, status.message_value().as_bytes());
    for (name, value) in metadata {
        if name == GRPC_STATUS || name == GRPC_MESSAGE {
            continue;
        }
        write_line(&mut buf, name.as_str(), value.as_bytes());
    }
    buf.freeze()
}

fn write_line(buf: &mut BytesMut, key: &str, value: &[u8]) {
    buf.put_slice(key.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}

/// Parse a trailer frame payload back into metadata.
pub fn parse_trailer_block(payload: &[u8]) -> Result<HeaderMap, FrameError> {
    let mut metadata = HeaderMap::new();
    for line in payload.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let malformed = || FrameError::MalformedTrailer(String::from_utf8_lossy(line).into_owned());
        let colon = line.iter().position(|b| *b == b':').ok_or_else(malformed)?;
        let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| malformed())?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| malformed())?;
        metadata.append(name, value);
    }
    Ok(metadata)
}

/// Incremental frame splitter.
///
/// Bytes arrive in arbitrary chunks; complete frames are handed out as soon
/// as their last payload byte has been pushed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return None;
        }
        let flags = self.buf.get_u8();
        self.buf.advance(4);
        let payload = self.buf.split_to(len).freeze();
        Some(Frame::with_flags(flags, payload))
    }

    /// Check that the stream ended on a frame boundary.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated(self.buf.len()))
        }
    }
}
