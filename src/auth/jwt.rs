//! # JWT Verification
//!
//! Bearer-token validation for the pipeline. Verification is a pure,
//! side-effect-free computation: decode, check the HS256 signature and
//! expiry, and map the claims onto a [`Principal`]. No locking, no I/O.
//!
//! The auth service mints the tokens; the gateway only consumes the
//! `userId`, `email`, `role`, and `exp` claims. Expired tokens and
//! signature/shape failures are reported as distinct errors because
//! clients handle them differently (refresh vs. re-login).

use axum::http::HeaderMap;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Principal, Role};

/// The claims the gateway consumes from GoCart access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
}

/// Stateless HS256 token verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Build a verifier for the shared HS256 secret.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // GoCart tokens carry exp but no aud/iss claims
        validation.validate_aud = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a bearer token and derive the principal it represents.
    ///
    /// A role claim outside the closed [`Role`] enum is an invalid token:
    /// forwarding a principal the policy table cannot classify would
    /// silently bypass the role gate.
    pub fn verify(&self, token: &str) -> GatewayResult<Principal> {
        let data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
                match err.kind() {
                    ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
                    _ => GatewayError::invalid_token(err.to_string()),
                }
            })?;

        let role = Role::parse(&data.claims.role)
            .ok_or_else(|| GatewayError::invalid_token(format!("unknown role '{}'", data.claims.role)))?;

        Ok(Principal {
            id: data.claims.user_id,
            email: data.claims.email,
            role,
        })
    }
}

/// Extract a bearer token from the `Authorization` header, if present.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}
