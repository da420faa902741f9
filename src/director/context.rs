//! Per-call context: target method and metadata.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::grpc_web::status::Status;

const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
];

/// Fully qualified method path, `/<service>/<method>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPath {
    path: String,
    split: usize,
}

impl MethodPath {
    /// Parse a request path. The service is everything before the last `/`.
    pub fn parse(path: &str) -> Result<Self, Status> {
        let malformed = || Status::unimplemented(format!("malformed method name: {path:?}"));
        let rest = path.strip_prefix('/').ok_or_else(malformed)?;
        let split = rest.rfind('/').ok_or_else(malformed)?;
        if split == 0 || split + 1 == rest.len() {
            return Err(malformed());
        }
        Ok(Self {
            path: path.to_string(),
            split: split + 1,
        })
    }

    pub fn service(&self) -> &str {
        &self.path[1..self.split]
    }

    pub fn method(&self) -> &str {
        &self.path[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for MethodPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Everything the director needs to open a backend call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub method: MethodPath,
    pub metadata: HeaderMap,
}

impl CallContext {
    pub fn new(method: MethodPath, metadata: HeaderMap) -> Self {
        Self { method, metadata }
    }

    /// Metadata to send to the backend.
    ///
    /// `connection` and the other HTTP/1 hop-by-hop headers are always
    /// dropped: HTTP/2 backends refuse streams that carry them. `host` is
    /// replaced by the channel's authority.
    pub fn outgoing_metadata(&self) -> HeaderMap {
        let mut metadata = self.metadata.clone();
        for name in HOP_BY_HOP {
            metadata.remove(name);
        }
        metadata.remove(header::HOST);
        metadata.insert(header::TE, HeaderValue::from_static("trailers"));
        metadata
    }
}
