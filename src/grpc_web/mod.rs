//! grpc-web wire format translation.
//!
//! # Data Flow
//! ```text
//! grpc-web request (binary or base64 text)
//!     → request.rs (pick sub-format, rewrite content type, decode base64)
//!     → Director::forward (native call on the backend channel)
//!     → response.rs (headers, one data frame per message, one trailer frame)
//!     → grpc-web response in the same sub-format
//! ```
//!
//! # Design Decisions
//! - Handled calls always answer HTTP 200; the outcome lives in the trailer frame
//! - Frames are never buffered beyond the one being assembled
//! - frame.rs and text.rs are pure byte codecs with no I/O

pub mod frame;
pub mod request;
pub mod response;
pub mod status;
pub mod text;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::sync::Arc;

use crate::director::{CallEvent, Director};
use crate::http::request::request_id;
use crate::observability::metrics::MethodLabels;

pub use frame::{Frame, FrameDecoder, FrameKind};
pub use request::{decode_request, Rejected, RequestFault, SubFormat};
pub use response::{CallRecord, EncodedBody, EncodeState, ResponseEncoder};
pub use status::{Code, Status};

/// Translates grpc-web exchanges into native calls and back.
#[derive(Clone)]
pub struct Translator {
    director: Director,
    labels: Arc<MethodLabels>,
}

impl Translator {
    pub fn new(director: Director) -> Self {
        Self::with_labels(director, MethodLabels::default())
    }

    pub fn with_labels(director: Director, labels: MethodLabels) -> Self {
        Self {
            director,
            labels: Arc::new(labels),
        }
    }

    /// Serve one grpc-web request.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let request_id = request_id(request.headers()).to_string();

        let decoded = match decode_request(request) {
            Ok(decoded) => decoded,
            Err(Rejected { format, status }) => {
                tracing::debug!(request_id = %request_id, status = %status, "Rejected request");
                return respond(
                    format,
                    HeaderMap::new(),
                    completion(status),
                    RequestFault::default(),
                    CallRecord::start("invalid", "invalid"),
                );
            }
        };

        let path = &decoded.context.method;
        tracing::debug!(
            request_id = %request_id,
            service = path.service(),
            method = path.method(),
            format = decoded.format.as_str(),
            "Forwarding call"
        );
        let record = CallRecord::start(path.as_str(), self.labels.label(path.as_str()));

        match self.director.forward(decoded.context, decoded.body).await {
            Ok(call) => respond(
                decoded.format,
                call.headers,
                call.stream.boxed(),
                decoded.fault,
                record,
            ),
            Err(status) => respond(
                decoded.format,
                HeaderMap::new(),
                completion(status),
                decoded.fault,
                record,
            ),
        }
    }
}

fn completion(status: Status) -> BoxStream<'static, CallEvent> {
    stream::once(async move { CallEvent::Complete(status, HeaderMap::new()) }).boxed()
}

fn respond(
    format: SubFormat,
    metadata: HeaderMap,
    source: BoxStream<'static, CallEvent>,
    fault: RequestFault,
    record: CallRecord,
) -> Response<Body> {
    let mut encoder = ResponseEncoder::new(format);
    let headers = match encoder.send_headers(metadata) {
        Ok(headers) => headers,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build response headers");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let body = Body::from_stream(EncodedBody::new(source, encoder, fault, record));
    let mut response = Response::new(body);
    *response.headers_mut() = headers;
    response
}
