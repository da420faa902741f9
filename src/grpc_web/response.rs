//! Outbound response encoding.
//!
//! Each call owns one `ResponseEncoder`:
//!
//! ```text
//! Init ──send_headers──▶ HeadersSent ──encode_message──▶ StreamingData
//!                             │                              │  ▲
//!                             │                              └──┘ encode_message
//!                             └──────encode_trailers─────────┴──▶ TrailersFlushed
//! ```
//!
//! Nothing can be encoded once `TrailersFlushed` is reached, so a call emits
//! exactly one trailer frame and it is always last.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

use crate::director::CallEvent;
use crate::grpc_web::frame::{Frame, FrameError};
use crate::grpc_web::request::{RequestFault, SubFormat, GRPC};
use crate::grpc_web::status::Status;
use crate::grpc_web::text::StreamingEncoder;
use crate::observability::metrics;

/// Response metadata that must not be relayed to the client as-is.
const DROPPED_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    Init,
    HeadersSent,
    StreamingData,
    TrailersFlushed,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot {op} in state {state:?}")]
    InvalidState { op: &'static str, state: EncodeState },

    #[error("trailer frames cannot be sent as messages")]
    TrailerAsMessage,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Per-call response state.
#[derive(Debug)]
pub struct ResponseEncoder {
    state: EncodeState,
    format: SubFormat,
    text: Option<StreamingEncoder>,
}

impl ResponseEncoder {
    pub fn new(format: SubFormat) -> Self {
        Self {
            state: EncodeState::Init,
            format,
            text: match format {
                SubFormat::Binary => None,
                SubFormat::Text => Some(StreamingEncoder::new()),
            },
        }
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    /// Build the client-facing headers from the backend's response metadata.
    pub fn send_headers(&mut self, mut metadata: HeaderMap) -> Result<HeaderMap, EncodeError> {
        self.require_state(&[EncodeState::Init], "send headers")?;

        let content_type = metadata
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| ct.starts_with(GRPC))
            .and_then(|ct| HeaderValue::from_str(&ct.replacen(GRPC, self.format.prefix(), 1)).ok())
            .unwrap_or_else(|| self.format.default_content_type());

        for name in &DROPPED_HEADERS {
            metadata.remove(name);
        }
        metadata.insert(header::CONTENT_TYPE, content_type);

        self.state = EncodeState::HeadersSent;
        Ok(metadata)
    }

    /// Encode one backend message as a data frame.
    pub fn encode_message(&mut self, frame: &Frame) -> Result<Bytes, EncodeError> {
        self.require_state(&[EncodeState::HeadersSent, EncodeState::StreamingData], "encode a message")?;
        if frame.is_trailer() {
            return Err(EncodeError::TrailerAsMessage);
        }
        let raw = frame.to_bytes()?;
        self.state = EncodeState::StreamingData;
        Ok(self.wrap(&raw))
    }

    /// Encode the trailer frame and flush any carried text bytes.
    pub fn encode_trailers(&mut self, status: &Status, metadata: &HeaderMap) -> Result<Bytes, EncodeError> {
        self.require_state(&[EncodeState::HeadersSent, EncodeState::StreamingData], "encode trailers")?;
        let raw = Frame::trailer(status, metadata).to_bytes()?;
        self.state = EncodeState::TrailersFlushed;

        match self.text.as_mut() {
            None => Ok(raw),
            Some(text) => {
                let mut out = text.encode(&raw).to_vec();
                out.extend_from_slice(&text.finish());
                Ok(Bytes::from(out))
            }
        }
    }

    fn wrap(&mut self, raw: &Bytes) -> Bytes {
        match self.text.as_mut() {
            None => raw.clone(),
            Some(text) => text.encode(raw),
        }
    }

    fn require_state(&self, allowed: &[EncodeState], op: &'static str) -> Result<(), EncodeError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncodeError::InvalidState { op, state: self.state })
        }
    }
}

/// Labels a call for logging and metrics.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Full method path, for logs.
    pub method: String,
    /// Bounded metric label.
    pub label: String,
    pub started: Instant,
}

impl CallRecord {
    pub fn start(method: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            label: label.into(),
            started: Instant::now(),
        }
    }
}

/// Client-facing response body: backend events encoded as grpc-web.
pub struct EncodedBody {
    source: BoxStream<'static, CallEvent>,
    encoder: ResponseEncoder,
    fault: RequestFault,
    record: CallRecord,
}

impl EncodedBody {
    /// `encoder` must already have sent headers.
    pub fn new(
        source: BoxStream<'static, CallEvent>,
        encoder: ResponseEncoder,
        fault: RequestFault,
        record: CallRecord,
    ) -> Self {
        Self {
            source,
            encoder,
            fault,
            record,
        }
    }

    fn finish(&mut self, status: Status, trailers: &HeaderMap) -> Option<Bytes> {
        let status = self.fault.status().unwrap_or(status);
        metrics::record_call(&self.record.label, status.code(), self.record.started);
        tracing::debug!(
            method = %self.record.method,
            code = %status.code(),
            message = %status.message(),
            "Call completed"
        );
        match self.encoder.encode_trailers(&status, trailers) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(method = %self.record.method, error = %e, "Failed to encode trailers");
                None
            }
        }
    }
}

impl Stream for EncodedBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.encoder.state() == EncodeState::TrailersFlushed {
                return Poll::Ready(None);
            }

            let event = ready!(this.source.poll_next_unpin(cx)).unwrap_or_else(|| {
                CallEvent::Complete(
                    Status::internal("call ended without a final status"),
                    HeaderMap::new(),
                )
            });

            match event {
                CallEvent::Message(frame) => match this.encoder.encode_message(&frame) {
                    Ok(bytes) if bytes.is_empty() => continue,
                    Ok(bytes) => return Poll::Ready(Some(Ok(bytes))),
                    Err(e) => {
                        let status = Status::internal(e.to_string());
                        return Poll::Ready(this.finish(status, &HeaderMap::new()).map(Ok));
                    }
                },
                CallEvent::Complete(status, trailers) => {
                    return Poll::Ready(this.finish(status, &trailers).map(Ok));
                }
            }
        }
    }
}

impl Drop for EncodedBody {
    fn drop(&mut self) {
        if self.encoder.state() != EncodeState::TrailersFlushed {
            tracing::debug!(method = %self.record.method, "Client went away; cancelling backend call");
            metrics::record_cancelled(&self.record.label);
        }
    }
}
