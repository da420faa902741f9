//! Trust store loading for TLS backends.

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

use crate::backend::ChannelError;

/// Source of root certificates for verifying the backend.
pub trait TrustStore: Send + Sync {
    fn load(&self) -> Result<RootCertStore, ChannelError>;
}

/// The platform's native certificate store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrustStore;

impl TrustStore for SystemTrustStore {
    fn load(&self) -> Result<RootCertStore, ChannelError> {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            tracing::warn!(error = %err, "Skipping unreadable system certificate source");
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(result.certs);
        tracing::debug!(added, ignored, "Loaded system trust store");

        if roots.is_empty() {
            let detail = result
                .errors
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no usable root certificates found".to_string());
            return Err(ChannelError::TrustStore(detail));
        }
        Ok(roots)
    }
}

/// Build a client TLS configuration that verifies against `roots`.
pub fn client_config(roots: RootCertStore) -> Result<ClientConfig, ChannelError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ChannelError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_store_still_builds_config() {
        let config = client_config(RootCertStore::empty()).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }
}
