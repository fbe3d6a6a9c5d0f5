//! # GoCart Gateway Library
//!
//! The single entry point in front of the GoCart marketplace services. Every
//! client request passes through one pipeline: route policy resolution,
//! bearer-token authentication, role authorization, per-class rate limiting,
//! and reverse-proxying to the owning upstream with the caller's verified
//! identity injected as headers.
//!
//! ## Module Overview
//!
//! - `core`: error taxonomy, configuration, and the principal/role types
//! - `auth`: stateless JWT verification
//! - `routing`: the static route policy table
//! - `middleware`: fixed-window rate limiting over pluggable counter stores
//! - `proxy`: path rewriting, header hygiene, and upstream forwarding
//! - `gateway`: the axum server that wires the pipeline together
//! - `observability`: logging setup and upstream health probes

/// Error types, configuration, and foundational data structures
pub mod core;

/// Bearer-token verification
pub mod auth;

/// Route policy table: path pattern -> access, rate-limit class, upstream
pub mod routing;

/// Rate limiting middleware and counter stores
pub mod middleware;

/// Upstream forwarding client
pub mod proxy;

/// The HTTP server and request pipeline
pub mod gateway;

/// Logging setup and upstream health probes
pub mod observability;

// Commonly used types, importable from the crate root
pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{Access, Principal, Role, RouteClass};
pub use crate::gateway::GatewayServer;
