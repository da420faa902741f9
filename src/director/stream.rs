//! Backend response stream.
//!
//! Turns the backend's HTTP/2 response (headers, framed body, trailers) into
//! an ordered sequence of message frames followed by exactly one completion.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, Response, StatusCode};
use futures_util::Stream;
use http_body::Body as _;

use crate::grpc_web::frame::{Frame, FrameDecoder};
use crate::grpc_web::status::{Code, Status, GRPC_MESSAGE, GRPC_STATUS};

/// One step of a backend call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A response message, flags byte preserved.
    Message(Frame),
    /// Final status and trailing metadata. Always the last event.
    Complete(Status, HeaderMap),
}

/// Stream of [`CallEvent`]s read off a backend response.
///
/// Dropping it drops the backend body, which resets the HTTP/2 stream and
/// cancels the call on the backend.
pub struct ServerStream {
    body: Body,
    decoder: FrameDecoder,
    /// Status fixed before the body was read (trailers-only or HTTP error).
    early: Option<Status>,
    done: bool,
}

impl ServerStream {
    /// Wrap a backend response. Returns the stream and the response metadata
    /// to be sent to the client as headers.
    pub fn new(response: Response<Body>) -> (HeaderMap, Self) {
        let (parts, body) = response.into_parts();
        let mut headers = parts.headers;

        let early = match Status::from_metadata(&headers) {
            Some(status) => Some(status),
            None if parts.status != StatusCode::OK => Some(Status::new(
                Code::from_http_status(parts.status),
                format!("backend responded with HTTP {}", parts.status),
            )),
            None => None,
        };
        headers.remove(GRPC_STATUS);
        headers.remove(GRPC_MESSAGE);

        let stream = Self {
            body,
            decoder: FrameDecoder::new(),
            early,
            done: false,
        };
        (headers, stream)
    }

    fn complete(&mut self, status: Status, trailers: HeaderMap) -> Poll<Option<CallEvent>> {
        self.done = true;
        Poll::Ready(Some(CallEvent::Complete(status, trailers)))
    }
}

impl Stream for ServerStream {
    type Item = CallEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<CallEvent>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(status) = this.early.take() {
            return this.complete(status, HeaderMap::new());
        }

        loop {
            if let Some(frame) = this.decoder.next_frame() {
                if frame.is_trailer() {
                    return this.complete(
                        Status::internal("backend sent a trailer frame in the message stream"),
                        HeaderMap::new(),
                    );
                }
                return Poll::Ready(Some(CallEvent::Message(frame)));
            }

            match ready!(Pin::new(&mut this.body).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => this.decoder.push(&data),
                    Err(frame) => {
                        let Ok(mut trailers) = frame.into_trailers() else {
                            continue;
                        };
                        if let Err(e) = this.decoder.finish() {
                            return this.complete(Status::internal(e.to_string()), HeaderMap::new());
                        }
                        let status = Status::from_metadata(&trailers).unwrap_or_else(|| {
                            Status::internal("backend trailers carried no grpc-status")
                        });
                        trailers.remove(GRPC_STATUS);
                        trailers.remove(GRPC_MESSAGE);
                        trailers.remove(header::CONTENT_LENGTH);
                        return this.complete(status, trailers);
                    }
                },
                Some(Err(e)) => {
                    let status = status_for_body_error(&e);
                    tracing::warn!(error = %e, code = %status.code(), "Backend stream failed");
                    return this.complete(status, HeaderMap::new());
                }
                None => {
                    let status = match this.decoder.finish() {
                        Err(e) => Status::internal(e.to_string()),
                        Ok(()) => Status::internal("backend closed the stream without sending trailers"),
                    };
                    return this.complete(status, HeaderMap::new());
                }
            }
        }
    }
}

fn status_for_body_error(err: &axum::Error) -> Status {
    let message = err.to_string();
    if is_cancellation(err) {
        Status::cancelled(message)
    } else {
        Status::unavailable(message)
    }
}

/// Whether the error chain holds an HTTP/2 `CANCEL` reset or a cancelled
/// hyper request.
fn is_cancellation(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(reset) = e.downcast_ref::<h2::Error>() {
            if reset.reason() == Some(h2::Reason::CANCEL) {
                return true;
            }
        }
        if let Some(request) = e.downcast_ref::<hyper::Error>() {
            if request.is_canceled() {
                return true;
            }
        }
        current = e.source();
    }
    false
}
