//! grpc-web proxy
//!
//! Lets browser clients speaking grpc-web (HTTP/1.1, optional base64 text
//! encoding, trailers in the body) call a backend that only speaks native
//! gRPC over HTTP/2.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌────────────────────────────────────────────────────┐
//!                     │                  GRPC-WEB PROXY                    │
//!                     │                                                    │
//!   grpc-web request  │  ┌──────────┐   ┌────────────┐   ┌────────────┐    │
//!   ──────────────────┼─▶│ security │──▶│  grpc_web  │──▶│  director  │    │
//!                     │  │   CORS   │   │   decode   │   │ (any path) │    │
//!                     │  └──────────┘   └────────────┘   └─────┬──────┘    │
//!                     │                                        │           │
//!                     │                                        ▼           │
//!   grpc-web response │                 ┌────────────┐   ┌────────────┐    │   HTTP/2
//!   ◀─────────────────┼─────────────────│  grpc_web  │◀──│  backend   │◀───┼── gRPC backend
//!                     │                 │   encode   │   │  channel   │    │
//!                     │                 └────────────┘   └────────────┘    │
//!                     │                                                    │
//!                     │   config · observability · lifecycle               │
//!                     └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use grpc_web_proxy::backend::SystemTrustStore;
use grpc_web_proxy::config::{load_config, Overrides};
use grpc_web_proxy::lifecycle::{self, signals, Shutdown};
use grpc_web_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "grpc-web-proxy")]
#[command(about = "Translate grpc-web requests for a native gRPC backend", long_about = None)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend address, e.g. localhost:50051 or api.example.com:443.
    #[arg(short, long)]
    backend: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(
        cli.config.as_deref(),
        Overrides {
            backend: cli.backend,
            port: cli.port,
            log_level: cli.log_level,
        },
    )?;

    logging::init(&config.observability.log_level);
    tracing::info!("grpc-web-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let proxy = lifecycle::start(config, &SystemTrustStore).await.map_err(|e| {
        tracing::error!(error = %e, "Startup failed");
        e
    })?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);
    proxy.run(shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
