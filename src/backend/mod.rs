//! Backend connector subsystem.
//!
//! # Data Flow
//! ```text
//! BackendConfig (address, credential policy)
//!     → target.rs (parse authority, resolve insecure vs system TLS)
//!     → tls.rs (load platform trust store, build rustls config)
//!     → channel.rs (HTTP/2-only hyper client, shared by all calls)
//! ```
//!
//! # Design Decisions
//! - Exactly one channel per process, built before the listener is bound
//! - Any failure here is fatal at startup
//! - Calls go through the `BackendChannel` trait so tests can inject stubs

pub mod channel;
pub mod target;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

pub use channel::{BackendChannel, HyperChannel};
pub use target::{BackendTarget, CredentialMode};
pub use tls::{SystemTrustStore, TrustStore};

use crate::config::BackendConfig;

/// Errors raised while building or using the backend channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("backend address is empty")]
    MissingAddress,

    #[error("invalid backend address {0:?}: {1}")]
    InvalidAddress(String, String),

    #[error("failed to load system trust store: {0}")]
    TrustStore(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("invalid backend request: {0}")]
    Request(String),

    #[error("backend transport error: {0}")]
    Transport(String),
}

/// Build the process-wide backend channel from configuration.
pub fn connect(
    config: &BackendConfig,
    trust: &dyn TrustStore,
) -> Result<Arc<dyn BackendChannel>, ChannelError> {
    let target = BackendTarget::new(&config.address, config.credentials)?;
    let channel = HyperChannel::connect(
        target,
        trust,
        Duration::from_secs(config.connect_timeout_secs),
    )?;
    Ok(Arc::new(channel))
}
