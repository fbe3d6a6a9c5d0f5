//! # Error Handling Module
//!
//! This module defines the error taxonomy for the gateway using the `thiserror` crate.
//! Every failure a request can hit in the pipeline maps to exactly one variant, one
//! HTTP status code, and one stable machine-readable code string.
//!
//! All pipeline failures are terminal for the request: nothing is forwarded after an
//! error, and the gateway never retries on the caller's behalf. Rejection bodies use
//! the shape the GoCart services expose everywhere:
//! `{ "success": false, "message": "...", "code": "..." }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// All failure modes of the request pipeline and the process around it.
///
/// The first six variants are the request-facing taxonomy; the rest cover
/// startup and internal failures that should never leak upstream detail to
/// clients.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// A protected route was called without any bearer token
    #[error("Authentication required")]
    AuthRequired,

    /// The bearer token was well-formed but its expiry has passed
    #[error("Token expired")]
    TokenExpired,

    /// The bearer token failed signature verification or is malformed
    #[error("Invalid token")]
    InvalidToken { reason: String },

    /// The principal is authenticated but its role does not satisfy the route policy
    #[error("Insufficient permissions")]
    InsufficientPermissions,

    /// The caller exhausted its quota for the route class
    #[error("Too many requests, please try again later")]
    RateLimitExceeded { retry_after: Duration },

    /// The resolved upstream was unreachable or timed out
    #[error("{upstream} service unavailable")]
    UpstreamUnavailable { upstream: String, reason: String },

    /// Request body exceeds the configured size cap
    #[error("Request body too large")]
    PayloadTooLarge { limit: usize },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal server error")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid-token error with a custom reason
    pub fn invalid_token<S: Into<String>>(reason: S) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    /// Create an upstream-unavailable error
    pub fn upstream_unavailable<S: Into<String>>(upstream: S, reason: S) -> Self {
        Self::UpstreamUnavailable {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// The HTTP status code surfaced to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable machine-readable code included in rejection bodies.
    ///
    /// Clients and the storefront match on these strings, so they must not
    /// change between releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert errors into the rejection responses the pipeline surfaces to callers.
///
/// Internal detail (upstream connect errors, verifier reasons, config messages)
/// stays in the logs; the body carries only the public message and code. The
/// one addition is the upstream name on `UPSTREAM_UNAVAILABLE`, which callers
/// need to tell a dead auth service from a dead payment service.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = json!({
            "success": false,
            "message": self.to_string(),
            "code": self.code(),
        });

        if let Self::UpstreamUnavailable { ref upstream, .. } = self {
            body["upstream"] = json!(upstream);
        }

        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimitExceeded { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}
