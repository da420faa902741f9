//! Streaming base64 for the `grpc-web-text` sub-format.
//!
//! Both directions work chunk by chunk. The encoder carries the 0-2 bytes
//! that do not fill a 3-byte group into the next call; the decoder carries
//! the 0-3 characters that do not fill a 4-character quantum.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    #[error("invalid base64 in request body: {0}")]
    Invalid(String),

    #[error("base64 request body ended with {0} dangling characters")]
    Incomplete(usize),
}

/// Incremental base64 encoder.
#[derive(Debug, Default)]
pub struct StreamingEncoder {
    carry: BytesMut,
}

impl StreamingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the longest 3-byte aligned prefix of carry + `input`.
    ///
    /// May return an empty buffer when fewer than three bytes are pending.
    pub fn encode(&mut self, input: &[u8]) -> Bytes {
        self.carry.extend_from_slice(input);
        let aligned = self.carry.len() - self.carry.len() % 3;
        if aligned == 0 {
            return Bytes::new();
        }
        let chunk = self.carry.split_to(aligned);
        Bytes::from(STANDARD.encode(&chunk))
    }

    /// Encode whatever is still carried, with padding.
    pub fn finish(&mut self) -> Bytes {
        if self.carry.is_empty() {
            return Bytes::new();
        }
        let rest = self.carry.split();
        Bytes::from(STANDARD.encode(&rest))
    }

    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Incremental base64 decoder.
///
/// Accepts padded quanta in the middle of the stream, which is what a client
/// produces when it base64-encodes each message separately. Line breaks are
/// skipped wherever they appear.
#[derive(Debug, Default)]
pub struct StreamingDecoder {
    carry: BytesMut,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, input: &[u8]) -> Result<Bytes, TextError> {
        self.carry
            .extend(input.iter().copied().filter(|b| !matches!(b, b'\r' | b'\n')));
        let aligned = self.carry.len() - self.carry.len() % 4;
        if aligned == 0 {
            return Ok(Bytes::new());
        }
        let chunk = self.carry.split_to(aligned);

        let mut out = Vec::with_capacity(aligned / 4 * 3);
        let mut start = 0;
        for end in (4..=chunk.len()).step_by(4) {
            // A padded quantum closes one independently padded segment.
            if chunk[end - 1] == b'=' || end == chunk.len() {
                STANDARD
                    .decode_vec(&chunk[start..end], &mut out)
                    .map_err(|e| TextError::Invalid(e.to_string()))?;
                start = end;
            }
        }
        Ok(Bytes::from(out))
    }

    pub fn finish(&self) -> Result<(), TextError> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            Err(TextError::Incomplete(self.carry.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_carries_unaligned_tail() {
        let mut enc = StreamingEncoder::new();
        assert!(enc.encode(b"a").is_empty());
        assert_eq!(enc.pending(), 1);
        assert_eq!(&enc.encode(b"bcd")[..], b"YWJj");
        assert_eq!(enc.pending(), 1);
        assert_eq!(&enc.finish()[..], b"ZA==");
        assert!(enc.finish().is_empty());
    }

    #[test]
    fn concatenated_chunks_equal_one_shot_encoding() {
        let input: Vec<u8> = (0u8..=200).collect();
        let mut enc = StreamingEncoder::new();
        let mut out = Vec::new();
        for chunk in input.chunks(7) {
            out.extend_from_slice(&enc.encode(chunk));
        }
        out.extend_from_slice(&enc.finish());
        assert_eq!(out, STANDARD.encode(&input).into_bytes());
    }

    #[test]
    fn decoder_handles_arbitrary_splits() {
        let encoded = STANDARD.encode(b"hello grpc-web");
        let mut dec = StreamingDecoder::new();
        let mut out = Vec::new();
        for chunk in encoded.as_bytes().chunks(3) {
            out.extend_from_slice(&dec.decode(chunk).unwrap());
        }
        assert!(dec.finish().is_ok());
        assert_eq!(out, b"hello grpc-web");
    }

    #[test]
    fn decoder_accepts_padding_mid_stream() {
        let mut dec = StreamingDecoder::new();
        let out = dec.decode(b"YQ==Yg==YWJj").unwrap();
        assert_eq!(&out[..], b"ababc");
    }

    #[test]
    fn decoder_skips_line_breaks() {
        let mut dec = StreamingDecoder::new();
        assert_eq!(&dec.decode(b"YWJj\r\nZGVm").unwrap()[..], b"abcdef");

        // A break splitting a quantum across chunks.
        let mut dec = StreamingDecoder::new();
        let mut out = dec.decode(b"YW\n").unwrap().to_vec();
        out.extend_from_slice(&dec.decode(b"\rJj\n").unwrap());
        assert!(dec.finish().is_ok());
        assert_eq!(out, b"abc");
    }

    #[test]
    fn decoder_rejects_garbage() {
        let mut dec = StreamingDecoder::new();
        assert!(matches!(dec.decode(b"@@@@"), Err(TextError::Invalid(_))));
    }

    #[test]
    fn decoder_reports_dangling_characters() {
        let mut dec = StreamingDecoder::new();
        dec.decode(b"YWJjZA").unwrap();
        assert_eq!(dec.finish(), Err(TextError::Incomplete(2)));
    }
}
