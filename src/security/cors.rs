//! CORS gatekeeper.
//!
//! # Responsibilities
//! - Decide whether a browser origin may call the proxy
//! - Answer preflight (`OPTIONS`) requests without touching the backend
//! - Decorate real responses with access-control headers
//!
//! # Design Decisions
//! - Origin acceptance is a pluggable `OriginPolicy`; the default allows all
//! - Allowed origins are mirrored back rather than answered with `*`, so
//!   credentialed requests keep working
//! - Preflight handling and header decoration are delegated to tower-http
//! - Requested headers are mirrored so custom metadata keys survive the
//!   preflight; `ALLOWED_HEADERS` are always added to the mirrored list

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Request headers every preflight answer allows, whatever was requested.
pub const ALLOWED_HEADERS: [HeaderName; 9] = [
    header::ACCEPT,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    header::AUTHORIZATION,
    HeaderName::from_static("x-grpc-web"),
    HeaderName::from_static("x-user-agent"),
    HeaderName::from_static("grpc-timeout"),
    HeaderName::from_static("x-request-id"),
];

/// Response headers scripts may read.
pub const EXPOSED_HEADERS: [HeaderName; 3] = [
    HeaderName::from_static("grpc-status"),
    HeaderName::from_static("grpc-message"),
    HeaderName::from_static("grpc-status-details-bin"),
];

/// Decides which origins are allowed.
pub trait OriginPolicy: Send + Sync + 'static {
    fn evaluate(&self, origin: &HeaderValue) -> bool;
}

/// Every origin is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl OriginPolicy for AllowAll {
    fn evaluate(&self, _origin: &HeaderValue) -> bool {
        true
    }
}

/// Only the listed origins are allowed (exact match).
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    origins: HashSet<HeaderValue>,
}

impl AllowList {
    pub fn new(origins: impl IntoIterator<Item = HeaderValue>) -> Self {
        Self {
            origins: origins.into_iter().collect(),
        }
    }
}

impl OriginPolicy for AllowList {
    fn evaluate(&self, origin: &HeaderValue) -> bool {
        self.origins.contains(origin)
    }
}

/// The outermost layer of the proxy.
#[derive(Clone)]
pub struct CorsGatekeeper {
    policy: Arc<dyn OriginPolicy>,
    max_age: Duration,
    allow_credentials: bool,
}

impl CorsGatekeeper {
    pub fn new(policy: Arc<dyn OriginPolicy>, max_age: Duration, allow_credentials: bool) -> Self {
        Self {
            policy,
            max_age,
            allow_credentials,
        }
    }

    /// An empty origin list means allow all. Invalid origins are skipped;
    /// config validation reports them before this point.
    pub fn from_config(config: &CorsConfig) -> Self {
        let policy: Arc<dyn OriginPolicy> = if config.allowed_origins.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(AllowList::new(
                config
                    .allowed_origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok()),
            ))
        };
        Self::new(
            policy,
            Duration::from_secs(config.max_age_secs),
            config.allow_credentials,
        )
    }

    pub fn evaluate(&self, origin: &HeaderValue) -> bool {
        self.policy.evaluate(origin)
    }

    /// The tower layer enforcing this policy.
    pub fn layer(&self) -> CorsLayer {
        let gatekeeper = self.clone();
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _parts: &Parts| gatekeeper.evaluate(origin),
            ))
            .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
            .allow_headers(AllowHeaders::mirror_request())
            .expose_headers(EXPOSED_HEADERS)
            .allow_credentials(self.allow_credentials)
            .max_age(self.max_age)
    }
}

impl std::fmt::Debug for CorsGatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorsGatekeeper")
            .field("max_age", &self.max_age)
            .field("allow_credentials", &self.allow_credentials)
            .finish_non_exhaustive()
    }
}

/// Add [`ALLOWED_HEADERS`] to a preflight's `access-control-request-headers`.
///
/// Runs in front of the CORS layer, which mirrors the widened list back.
pub async fn widen_preflight(mut request: Request) -> Request {
    if request.method() == Method::OPTIONS {
        widen_requested_headers(request.headers_mut());
    }
    request
}

fn widen_requested_headers(headers: &mut HeaderMap) {
    if !headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD) {
        return;
    }
    let mut names: Vec<String> = headers
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &ALLOWED_HEADERS {
        if !names.iter().any(|n| n == name.as_str()) {
            names.push(name.as_str().to_string());
        }
    }
    if let Ok(value) = HeaderValue::from_str(&names.join(",")) {
        headers.insert(header::ACCESS_CONTROL_REQUEST_HEADERS, value);
    }
}
