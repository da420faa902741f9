//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::routing::any;
use axum::Router;
use bytes::{Bytes, BytesMut};
use http_body::Frame as BodyFrame;
use http_body_util::{BodyExt, StreamBody};
use tokio::net::TcpListener;

use grpc_web_proxy::backend::SystemTrustStore;
use grpc_web_proxy::grpc_web::{Frame, FrameDecoder};
use grpc_web_proxy::lifecycle::{self, Shutdown};
use grpc_web_proxy::ProxyConfig;

/// Start a cleartext HTTP/2 gRPC backend on an ephemeral port.
///
/// - `/echo.Echo/Upper` answers every request message with its uppercase form
/// - `/echo.Echo/Fail` answers trailers-only with NOT_FOUND
/// - `/echo.Echo/Overloaded` answers HTTP 503 with no gRPC status
/// - anything else echoes the `x-custom` request metadata back as a trailer
pub async fn start_grpc_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/echo.Echo/Upper", any(upper))
        .route("/echo.Echo/Fail", any(fail))
        .route("/echo.Echo/Overloaded", any(overloaded))
        .route("/{*path}", any(metadata_echo));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn upper(request: Request<Body>) -> Response<Body> {
    let body = request.into_body().collect().await.unwrap().to_bytes();
    let mut decoder = FrameDecoder::new();
    decoder.push(&body);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame() {
        let upper = frame.payload().to_ascii_uppercase();
        frames.push(BodyFrame::data(Frame::data(upper).to_bytes().unwrap()));
    }
    grpc_response(frames, ok_trailers())
}

async fn fail() -> Response<Body> {
    Response::builder()
        .header("content-type", "application/grpc")
        .header("grpc-status", "5")
        .header("grpc-message", "no such echo")
        .body(Body::empty())
        .unwrap()
}

async fn overloaded() -> Response<Body> {
    Response::builder()
        .status(503)
        .header("content-type", "text/plain")
        .body(Body::from("try later"))
        .unwrap()
}

async fn metadata_echo(request: Request<Body>) -> Response<Body> {
    let mut trailers = ok_trailers();
    if let Some(custom) = request.headers().get("x-custom") {
        trailers.insert("x-seen-custom", custom.clone());
    }
    let content_type = request.headers().get("content-type").cloned();
    if let Some(ct) = content_type {
        trailers.insert("x-seen-content-type", ct);
    }
    grpc_response(Vec::new(), trailers)
}

fn ok_trailers() -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    trailers
}

fn grpc_response(mut frames: Vec<BodyFrame<Bytes>>, trailers: HeaderMap) -> Response<Body> {
    frames.push(BodyFrame::trailers(trailers));
    let stream = futures_util::stream::iter(frames.into_iter().map(Ok::<_, Infallible>));
    Response::builder()
        .header("content-type", "application/grpc+proto")
        .body(Body::new(StreamBody::new(stream)))
        .unwrap()
}

/// Start the proxy on an ephemeral port in front of `backend`.
pub async fn start_proxy(backend: &str) -> (SocketAddr, Shutdown) {
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.backend.address = backend.into();

    let proxy = lifecycle::start(config, &SystemTrustStore).await.unwrap();
    let addr = proxy.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = proxy.run(rx).await;
    });
    (addr, shutdown)
}

/// POST a grpc-web call the way a browser client would.
pub async fn grpc_web_post(
    proxy: SocketAddr,
    path: &str,
    content_type: &str,
    body: Bytes,
) -> reqwest::Response {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
        .post(format!("http://{proxy}{path}"))
        .header("content-type", content_type)
        .header("x-grpc-web", "1")
        .header("x-custom", "hello")
        .header("origin", "https://app.example")
        .body(body)
        .send()
        .await
        .expect("proxy unreachable")
}

/// Concatenate messages as data frames.
pub fn request_body(messages: &[&str]) -> Bytes {
    let mut buf = BytesMut::new();
    for message in messages {
        Frame::data(Bytes::copy_from_slice(message.as_bytes()))
            .encode(&mut buf)
            .unwrap();
    }
    buf.freeze()
}

/// Split a binary grpc-web response body into frames.
pub fn split_frames(body: &[u8]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    decoder.push(body);
    let frames = std::iter::from_fn(|| decoder.next_frame()).collect();
    decoder.finish().expect("response ended on a frame boundary");
    frames
}
