//! The shared HTTP/2 channel to the backend.
//!
//! One `HyperChannel` is built at startup and shared by every call. The
//! underlying `hyper-util` client multiplexes concurrent calls as separate
//! HTTP/2 streams over its pooled connection, so callers need no locking.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{uri::PathAndQuery, Request, Response, Uri, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::backend::target::{BackendTarget, CredentialMode};
use crate::backend::tls::{client_config, TrustStore};
use crate::backend::ChannelError;

/// Issues calls to the backend.
///
/// Requests arrive with a path-only URI; the channel fills in scheme and
/// authority for its target.
#[async_trait]
pub trait BackendChannel: Send + Sync + 'static {
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, ChannelError>;
}

enum Transport {
    Plain(Client<HttpConnector, Body>),
    Tls(Client<HttpsConnector<HttpConnector>, Body>),
}

/// Long-lived multiplexed channel backed by `hyper-util`.
pub struct HyperChannel {
    target: BackendTarget,
    transport: Transport,
}

impl std::fmt::Debug for HyperChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperChannel")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl HyperChannel {
    /// Build the channel for `target`.
    ///
    /// The trust store is only consulted for TLS targets. Connections are
    /// established lazily on the first call.
    pub fn connect(
        target: BackendTarget,
        trust: &dyn TrustStore,
        connect_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(connect_timeout));
        http.set_nodelay(true);

        let transport = match target.mode() {
            CredentialMode::Insecure => Transport::Plain(
                Client::builder(TokioExecutor::new())
                    .http2_only(true)
                    .build(http),
            ),
            CredentialMode::SystemTls => {
                let roots = trust.load()?;
                let tls = client_config(roots)?;
                http.enforce_http(false);
                let connector = hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(tls)
                    .https_only()
                    .enable_http2()
                    .wrap_connector(http);
                Transport::Tls(
                    Client::builder(TokioExecutor::new())
                        .http2_only(true)
                        .build(connector),
                )
            }
        };

        tracing::info!(
            target = %target,
            credentials = %target.mode(),
            "Backend channel ready"
        );

        Ok(Self { target, transport })
    }

    fn absolute_uri(&self, uri: &Uri) -> Result<Uri, ChannelError> {
        let path = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        Uri::builder()
            .scheme(self.target.mode().scheme())
            .authority(self.target.authority().clone())
            .path_and_query(path)
            .build()
            .map_err(|e| ChannelError::Request(e.to_string()))
    }
}

#[async_trait]
impl BackendChannel for HyperChannel {
    async fn call(&self, mut request: Request<Body>) -> Result<Response<Body>, ChannelError> {
        *request.uri_mut() = self.absolute_uri(request.uri())?;
        *request.version_mut() = Version::HTTP_2;

        let result = match &self.transport {
            Transport::Plain(client) => client.request(request).await,
            Transport::Tls(client) => client.request(request).await,
        };

        result
            .map(|response| response.map(Body::new))
            .map_err(|e| ChannelError::Transport(error_chain(&e)))
    }
}

/// Render an error with its sources; hyper-util's top level message alone
/// rarely says what went wrong.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialPolicy;
    use rustls::RootCertStore;

    struct FailingTrustStore;

    impl TrustStore for FailingTrustStore {
        fn load(&self) -> Result<RootCertStore, ChannelError> {
            Err(ChannelError::TrustStore("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn insecure_target_skips_trust_store() {
        let target = BackendTarget::new("localhost:50051", CredentialPolicy::Auto).unwrap();
        let channel = HyperChannel::connect(target, &FailingTrustStore, Duration::from_secs(1));
        assert!(channel.is_ok());
    }

    #[tokio::test]
    async fn tls_target_fails_without_trust_store() {
        let target = BackendTarget::new("api.example.com:443", CredentialPolicy::Auto).unwrap();
        let err = HyperChannel::connect(target, &FailingTrustStore, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChannelError::TrustStore(_)));
    }

    #[tokio::test]
    async fn rewrites_path_only_uri() {
        let target = BackendTarget::new("localhost:50051", CredentialPolicy::Auto).unwrap();
        let channel = HyperChannel::connect(target, &FailingTrustStore, Duration::from_secs(1)).unwrap();
        let uri = channel
            .absolute_uri(&Uri::from_static("/pkg.Echo/Say"))
            .unwrap();
        assert_eq!(uri.to_string(), "http://localhost:50051/pkg.Echo/Say");
    }
}
