//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, HTTP/1.1 + HTTP/2)
//!     → request.rs (request ID)
//!     → security::cors (preflight short-circuit)
//!     → grpc_web::Translator (decode, forward, encode)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{request_id, UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
