//! grpc-web to gRPC translating proxy library.

pub mod backend;
pub mod config;
pub mod director;
pub mod grpc_web;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
