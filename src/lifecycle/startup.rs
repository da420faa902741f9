//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the backend channel
//! - Start background tasks (metrics exporter)
//! - Bind the listener and hand it to the HTTP server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The backend channel is built before the listener, so a bad trust store
//!   means no port is ever opened
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::backend::{self, ChannelError, TrustStore};
use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed dialing backend: {0}")]
    Backend(#[from] ChannelError),

    #[error("failed listening on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A proxy that is bound and ready to serve.
pub struct Proxy {
    server: HttpServer,
    listener: TcpListener,
}

impl Proxy {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        self.server.run(self.listener, shutdown).await
    }
}

/// Bring the proxy up in dependency order.
pub async fn start(config: ProxyConfig, trust: &dyn TrustStore) -> Result<Proxy, StartupError> {
    tracing::info!(backend = %config.backend.address, "Proxying to backend");
    let channel = backend::connect(&config.backend, trust)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!(address = %address, "grpc-web proxy listening");

    Ok(Proxy {
        server: HttpServer::new(config, channel),
        listener,
    })
}
