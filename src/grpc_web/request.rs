//! Inbound request decoding.
//!
//! # Responsibilities
//! - Recognise the grpc-web content types and pick the call's sub-format
//! - Rewrite the content type to native `application/grpc`
//! - Drop the outer transport's `content-length`
//! - Wrap text-format bodies in a streaming base64 decoder
//!
//! # Design Decisions
//! - The sub-format is fixed here and reused for the response
//! - Requests that cannot be decoded are rejected before anything reaches
//!   the backend; the rejection is reported through the trailer frame
//! - Base64 errors found while streaming are recorded in a `RequestFault`
//!   so the final status reflects them

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};

use axum::body::{Body, BodyDataStream};
use axum::http::{header, HeaderValue, Method, Request};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::director::{CallContext, MethodPath};
use crate::grpc_web::status::Status;
use crate::grpc_web::text::StreamingDecoder;

pub const GRPC: &str = "application/grpc";
pub const GRPC_WEB: &str = "application/grpc-web";
pub const GRPC_WEB_TEXT: &str = "application/grpc-web-text";

/// Framing sub-format of a call, fixed at request decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    /// Raw length-prefixed frames.
    Binary,
    /// The same byte stream, base64 encoded.
    Text,
}

impl SubFormat {
    /// Classify a request content type. `None` for anything that is not grpc-web.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.starts_with(GRPC_WEB_TEXT) {
            Some(SubFormat::Text)
        } else if content_type.starts_with(GRPC_WEB) {
            Some(SubFormat::Binary)
        } else {
            None
        }
    }

    /// Content type prefix the client speaks in this sub-format.
    pub fn prefix(self) -> &'static str {
        match self {
            SubFormat::Binary => GRPC_WEB,
            SubFormat::Text => GRPC_WEB_TEXT,
        }
    }

    /// Response content type used when the backend did not send a usable one.
    pub fn default_content_type(self) -> HeaderValue {
        match self {
            SubFormat::Binary => HeaderValue::from_static("application/grpc-web+proto"),
            SubFormat::Text => HeaderValue::from_static("application/grpc-web-text+proto"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubFormat::Binary => "binary",
            SubFormat::Text => "text",
        }
    }
}

/// Base64 failure observed while streaming a text-format request body.
#[derive(Debug, Clone, Default)]
pub struct RequestFault(Arc<OnceLock<String>>);

impl RequestFault {
    pub fn record(&self, message: impl Into<String>) {
        let _ = self.0.set(message.into());
    }

    /// Status that replaces the backend's verdict when the request was malformed.
    pub fn status(&self) -> Option<Status> {
        self.0.get().map(|m| Status::invalid_argument(m.clone()))
    }
}

/// A request ready to be forwarded.
pub struct DecodedRequest {
    pub context: CallContext,
    pub body: Body,
    pub format: SubFormat,
    pub fault: RequestFault,
}

/// A request the translator refuses to forward.
#[derive(Debug)]
pub struct Rejected {
    pub format: SubFormat,
    pub status: Status,
}

/// Convert an inbound grpc-web request into a native call.
pub fn decode_request(request: Request<Body>) -> Result<DecodedRequest, Rejected> {
    let (parts, body) = request.into_parts();

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let Some(format) = SubFormat::from_content_type(&content_type) else {
        return Err(Rejected {
            format: SubFormat::Binary,
            status: Status::invalid_argument(format!("unsupported content-type {content_type:?}")),
        });
    };

    if parts.method != Method::POST {
        return Err(Rejected {
            format,
            status: Status::invalid_argument(format!("unsupported HTTP method {}", parts.method)),
        });
    }

    let method = MethodPath::parse(parts.uri.path()).map_err(|status| Rejected { format, status })?;

    let mut metadata = parts.headers;
    let native = content_type.replacen(format.prefix(), GRPC, 1);
    let native = HeaderValue::from_str(&native).unwrap_or_else(|_| HeaderValue::from_static(GRPC));
    metadata.insert(header::CONTENT_TYPE, native);
    metadata.remove(header::CONTENT_LENGTH);

    let fault = RequestFault::default();
    let body = match format {
        SubFormat::Binary => body,
        SubFormat::Text => Body::from_stream(TextDecodingStream::new(body.into_data_stream(), fault.clone())),
    };

    Ok(DecodedRequest {
        context: CallContext::new(method, metadata),
        body,
        format,
        fault,
    })
}

/// Body adapter that base64-decodes a text-format request as it streams.
struct TextDecodingStream {
    inner: BodyDataStream,
    decoder: StreamingDecoder,
    fault: RequestFault,
    done: bool,
}

impl TextDecodingStream {
    fn new(inner: BodyDataStream, fault: RequestFault) -> Self {
        Self {
            inner,
            decoder: StreamingDecoder::new(),
            fault,
            done: false,
        }
    }

    fn fail(&mut self, err: crate::grpc_web::text::TextError) -> Poll<Option<Result<Bytes, axum::Error>>> {
        self.done = true;
        self.fault.record(err.to_string());
        Poll::Ready(Some(Err(axum::Error::new(err))))
    }
}

impl Stream for TextDecodingStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => match this.decoder.decode(&chunk) {
                    Ok(decoded) if decoded.is_empty() => continue,
                    Ok(decoded) => return Poll::Ready(Some(Ok(decoded))),
                    Err(e) => return this.fail(e),
                },
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    if let Err(e) = this.decoder.finish() {
                        return this.fail(e);
                    }
                    this.done = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc_web::status::Code;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use http_body_util::BodyExt;

    fn post(content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/echo.Echo/Say")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, "99")
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn classifies_content_types() {
        assert_eq!(SubFormat::from_content_type("application/grpc-web"), Some(SubFormat::Binary));
        assert_eq!(SubFormat::from_content_type("application/grpc-web+proto"), Some(SubFormat::Binary));
        assert_eq!(SubFormat::from_content_type("application/grpc-web-text"), Some(SubFormat::Text));
        assert_eq!(SubFormat::from_content_type("application/grpc-web-text+proto"), Some(SubFormat::Text));
        assert_eq!(SubFormat::from_content_type("application/json"), None);
        assert_eq!(SubFormat::from_content_type("application/grpc"), None);
    }

    #[tokio::test]
    async fn binary_request_is_rewritten() {
        let decoded = decode_request(post("application/grpc-web+proto", "payload")).unwrap();
        assert_eq!(decoded.format, SubFormat::Binary);
        let md = &decoded.context.metadata;
        assert_eq!(md.get(header::CONTENT_TYPE).unwrap(), "application/grpc+proto");
        assert!(md.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(decoded.context.method.as_str(), "/echo.Echo/Say");

        let bytes = decoded.body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn text_request_is_base64_decoded() {
        let encoded = STANDARD.encode(b"\x00\x00\x00\x00\x02hi");
        let decoded = decode_request(post("application/grpc-web-text", encoded)).unwrap();
        assert_eq!(decoded.format, SubFormat::Text);
        assert_eq!(
            decoded.context.metadata.get(header::CONTENT_TYPE).unwrap(),
            "application/grpc"
        );
        let bytes = decoded.body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"\x00\x00\x00\x00\x02hi");
        assert!(decoded.fault.status().is_none());
    }

    #[tokio::test]
    async fn malformed_base64_records_fault() {
        let decoded = decode_request(post("application/grpc-web-text", "!!!!")).unwrap();
        let fault = decoded.fault.clone();
        assert!(decoded.body.collect().await.is_err());
        assert_eq!(fault.status().unwrap().code(), Code::InvalidArgument);
    }

    #[test]
    fn rejects_unknown_content_type() {
        let rejected = decode_request(post("application/json", "{}")).err().unwrap();
        assert_eq!(rejected.format, SubFormat::Binary);
        assert_eq!(rejected.status.code(), Code::InvalidArgument);
    }

    #[test]
    fn rejects_non_post() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/echo.Echo/Say")
            .header(header::CONTENT_TYPE, "application/grpc-web-text")
            .body(Body::empty())
            .unwrap();
        let rejected = decode_request(request).err().unwrap();
        assert_eq!(rejected.format, SubFormat::Text);
        assert_eq!(rejected.status.code(), Code::InvalidArgument);
    }

    #[test]
    fn rejects_malformed_method_path() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/not-a-method")
            .header(header::CONTENT_TYPE, "application/grpc-web")
            .body(Body::empty())
            .unwrap();
        let rejected = decode_request(request).err().unwrap();
        assert_eq!(rejected.status.code(), Code::Unimplemented);
    }
}
