//! Backend target and credential mode selection.

use std::str::FromStr;

use axum::http::uri::{Authority, Scheme};

use crate::backend::ChannelError;
use crate::config::CredentialPolicy;

/// Address fragments that identify a local development backend.
const LOOPBACK_MARKERS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Transport security used by the backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Insecure,
    SystemTls,
}

impl CredentialMode {
    /// Resolve a policy against a concrete address.
    pub fn resolve(policy: CredentialPolicy, address: &str) -> Self {
        match policy {
            CredentialPolicy::Insecure => CredentialMode::Insecure,
            CredentialPolicy::Tls => CredentialMode::SystemTls,
            CredentialPolicy::Auto => {
                if LOOPBACK_MARKERS.iter().any(|m| address.contains(m)) {
                    CredentialMode::Insecure
                } else {
                    CredentialMode::SystemTls
                }
            }
        }
    }

    pub fn scheme(self) -> Scheme {
        match self {
            CredentialMode::Insecure => Scheme::HTTP,
            CredentialMode::SystemTls => Scheme::HTTPS,
        }
    }
}

impl std::fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialMode::Insecure => f.write_str("insecure"),
            CredentialMode::SystemTls => f.write_str("system-tls"),
        }
    }
}

/// The one backend this process forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    authority: Authority,
    mode: CredentialMode,
}

impl BackendTarget {
    pub fn new(address: &str, policy: CredentialPolicy) -> Result<Self, ChannelError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ChannelError::MissingAddress);
        }
        let authority = Authority::from_str(address)
            .map_err(|e| ChannelError::InvalidAddress(address.to_string(), e.to_string()))?;
        Ok(Self {
            mode: CredentialMode::resolve(policy, address),
            authority,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.mode.scheme(), self.authority)
    }
}
