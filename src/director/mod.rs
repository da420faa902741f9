//! Transparent call director.
//!
//! # Data Flow
//! ```text
//! CallContext (method path + incoming metadata) + request body
//!     → context.rs (strip `connection`, add `te: trailers`)
//!     → BackendChannel::call (new HTTP/2 stream on the shared channel)
//!     → stream.rs (response frames in order, then one completion)
//! ```
//!
//! # Design Decisions
//! - No method registry: any `/<service>/<method>` is forwarded as opaque bytes
//! - Backend failures become a call status, never a proxy error
//! - Cancellation is drop-based in both directions: a client that goes away
//!   drops the response stream, which resets the backend stream

pub mod context;
pub mod stream;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};

use crate::backend::BackendChannel;
use crate::grpc_web::status::Status;

pub use context::{CallContext, MethodPath};
pub use stream::{CallEvent, ServerStream};

/// Forwards calls to the backend channel.
#[derive(Clone)]
pub struct Director {
    channel: Arc<dyn BackendChannel>,
}

/// An open backend call.
pub struct ForwardedCall {
    /// Response metadata to hand back as headers.
    pub headers: axum::http::HeaderMap,
    /// Response messages followed by the final status.
    pub stream: ServerStream,
}

impl Director {
    pub fn new(channel: Arc<dyn BackendChannel>) -> Self {
        Self { channel }
    }

    /// Open a backend call for `ctx`, streaming `body` as its request.
    ///
    /// The request body is piped through as it arrives, so client-streaming
    /// calls work unchanged.
    pub async fn forward(&self, ctx: CallContext, body: Body) -> Result<ForwardedCall, Status> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(ctx.method.as_str())
            .body(body)
            .map_err(|e| Status::internal(format!("cannot build backend request: {e}")))?;
        *request.headers_mut() = ctx.outgoing_metadata();

        let response = self.channel.call(request).await.map_err(|e| {
            tracing::warn!(method = %ctx.method, error = %e, "Backend call failed");
            Status::unavailable(e.to_string())
        })?;

        let (headers, stream) = ServerStream::new(response);
        Ok(ForwardedCall { headers, stream })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChannelError;
    use crate::grpc_web::status::Code;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue, Response};
    use futures_util::StreamExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        seen: Mutex<Vec<(String, HeaderMap)>>,
    }

    #[async_trait]
    impl BackendChannel for RecordingChannel {
        async fn call(&self, request: Request<Body>) -> Result<Response<Body>, ChannelError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.uri().path().to_string(), request.headers().clone()));
            Ok(Response::builder()
                .header("grpc-status", "0")
                .body(Body::empty())
                .unwrap())
        }
    }

    struct DownChannel;

    #[async_trait]
    impl BackendChannel for DownChannel {
        async fn call(&self, _: Request<Body>) -> Result<Response<Body>, ChannelError> {
            Err(ChannelError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn forwards_any_method_without_connection_header() {
        let channel = Arc::new(RecordingChannel::default());
        let director = Director::new(channel.clone());

        for path in ["/a.Alpha/One", "/b.Beta/Two"] {
            let mut metadata = HeaderMap::new();
            metadata.insert("connection", HeaderValue::from_static("keep-alive"));
            metadata.insert("x-user", HeaderValue::from_static("u1"));
            let ctx = CallContext::new(MethodPath::parse(path).unwrap(), metadata);

            let call = director.forward(ctx, Body::empty()).await.unwrap();
            let events: Vec<_> = call.stream.collect().await;
            assert!(matches!(&events[..], [CallEvent::Complete(s, _)] if s.code() == Code::Ok));
        }

        let seen = channel.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "/a.Alpha/One");
        assert_eq!(seen[1].0, "/b.Beta/Two");
        for (_, headers) in seen.iter() {
            assert!(headers.get("connection").is_none());
            assert_eq!(headers.get("x-user").unwrap(), "u1");
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_call_status() {
        let director = Director::new(Arc::new(DownChannel));
        let ctx = CallContext::new(MethodPath::parse("/s.S/M").unwrap(), HeaderMap::new());
        let err = director.forward(ctx, Body::empty()).await.err().unwrap();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(err.message().contains("connection refused"));
    }
}
