//! Failure injection tests: dead backends, broken trust stores, bad input.

use std::net::TcpListener as StdListener;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use grpc_web_proxy::backend::{ChannelError, TrustStore};
use grpc_web_proxy::grpc_web::frame::parse_trailer_block;
use grpc_web_proxy::lifecycle::{self, StartupError};
use grpc_web_proxy::ProxyConfig;

mod common;

fn free_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn final_status(res: reqwest::Response) -> (String, String) {
    assert_eq!(res.status(), 200);
    let frames = common::split_frames(&res.bytes().await.unwrap());
    let trailer = frames.last().expect("a trailer frame");
    assert!(trailer.is_trailer());
    let trailers = parse_trailer_block(trailer.payload()).unwrap();
    let message = trailers
        .get("grpc-message")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (trailers["grpc-status"].to_str().unwrap().to_string(), message)
}

#[tokio::test]
async fn test_unreachable_backend_reports_unavailable() {
    let (proxy, shutdown) = common::start_proxy(&format!("127.0.0.1:{}", free_port())).await;

    let res = common::grpc_web_post(
        proxy,
        "/echo.Echo/Upper",
        "application/grpc-web+proto",
        common::request_body(&["a"]),
    )
    .await;
    let (code, _) = final_status(res).await;
    assert_eq!(code, "14");

    shutdown.trigger();
}

#[tokio::test]
async fn test_backend_http_error_maps_to_grpc_status() {
    let backend = common::start_grpc_backend().await;
    let (proxy, shutdown) = common::start_proxy(&backend.to_string()).await;

    let res = common::grpc_web_post(
        proxy,
        "/echo.Echo/Overloaded",
        "application/grpc-web+proto",
        common::request_body(&["a"]),
    )
    .await;
    let (code, _) = final_status(res).await;
    assert_eq!(code, "14");

    shutdown.trigger();
}

#[tokio::test]
async fn test_malformed_text_body_is_invalid_argument() {
    let backend = common::start_grpc_backend().await;
    let (proxy, shutdown) = common::start_proxy(&backend.to_string()).await;

    let res = common::grpc_web_post(
        proxy,
        "/echo.Echo/Upper",
        "application/grpc-web-text+proto",
        Bytes::from_static(b"%%%%not base64%%%%"),
    )
    .await;
    assert_eq!(res.headers()["content-type"], "application/grpc-web-text+proto");
    let text = res.bytes().await.unwrap();
    let binary = STANDARD.decode(&text).unwrap();
    let frames = common::split_frames(&binary);
    let trailers = parse_trailer_block(frames.last().unwrap().payload()).unwrap();
    assert_eq!(trailers["grpc-status"], "3");

    shutdown.trigger();
}

#[tokio::test]
async fn test_malformed_method_path_is_unimplemented() {
    let backend = common::start_grpc_backend().await;
    let (proxy, shutdown) = common::start_proxy(&backend.to_string()).await;

    let res = common::grpc_web_post(
        proxy,
        "/no-method-here",
        "application/grpc-web+proto",
        common::request_body(&["a"]),
    )
    .await;
    let (code, message) = final_status(res).await;
    assert_eq!(code, "12");
    assert!(!message.is_empty());

    shutdown.trigger();
}

struct NoTrustStore;

impl TrustStore for NoTrustStore {
    fn load(&self) -> Result<rustls::RootCertStore, ChannelError> {
        Err(ChannelError::TrustStore("no certificates".into()))
    }
}

#[tokio::test]
async fn test_missing_trust_store_fails_before_listening() {
    let port = free_port();
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = port;
    config.backend.address = "api.example.com:443".into();

    let err = lifecycle::start(config, &NoTrustStore).await.err().unwrap();
    assert!(matches!(err, StartupError::Backend(ChannelError::TrustStore(_))));

    // Nothing holds the port: the listener was never opened.
    assert!(StdListener::bind(("127.0.0.1", port)).is_ok());
}
