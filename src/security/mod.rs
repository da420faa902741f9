//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (preflight answered here; others decorated and passed on)
//!     → Pass to the grpc-web translator
//! ```
//!
//! # Design Decisions
//! - Authentication is the backend's job; credentials travel as metadata
//! - Origin policy is pluggable; permissive by default

pub mod cors;

pub use cors::{widen_preflight, AllowAll, AllowList, CorsGatekeeper, OriginPolicy};
