//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the grpc-web catch-all handler
//! - Configure HTTP/1.1 and HTTP/2 support
//! - Wire up middleware (tracing, request ID, CORS)
//! - Bind server to listener
//! - Drain in-flight calls on shutdown

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    middleware,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::backend::BackendChannel;
use crate::config::ProxyConfig;
use crate::director::Director;
use crate::grpc_web::Translator;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::security::{widen_preflight, CorsGatekeeper};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub translator: Translator,
}

/// HTTP server for the grpc-web proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server forwarding every call over `channel`.
    pub fn new(config: ProxyConfig, channel: Arc<dyn BackendChannel>) -> Self {
        let state = AppState {
            translator: Translator::new(Director::new(channel)),
        };
        let gatekeeper = CorsGatekeeper::from_config(&config.cors);

        let router = Self::build_router(state, &gatekeeper);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// CORS sits outside the handler so preflight requests never reach it.
    fn build_router(state: AppState, gatekeeper: &CorsGatekeeper) -> Router {
        Router::new()
            .route("/{*path}", any(grpc_web_handler))
            .route("/", any(grpc_web_handler))
            .with_state(state)
            .layer(gatekeeper.layer())
            .layer(middleware::map_request(widen_preflight))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// The fully layered router, for driving the proxy without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.address,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining calls");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn grpc_web_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    state.translator.handle(request).await
}
