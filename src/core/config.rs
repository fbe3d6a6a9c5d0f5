//! # Configuration Module
//!
//! Gateway configuration: YAML parsing with serde, environment variable
//! overrides, and startup validation with detailed error messages.
//!
//! Configuration is loaded once during startup and immutable afterwards.
//! Upstream targets, the JWT secret, and rate-limit quotas all live here;
//! the route policy table itself is static code (see `routing::policy`)
//! because the access rules are part of the gateway's contract with the
//! upstreams, not an operator knob.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::RouteClass;

/// Main gateway configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration (bind address, body cap, shutdown grace)
    pub server: ServerConfig,

    /// Token verification settings
    pub auth: AuthConfig,

    /// Upstream service targets, keyed by service name
    pub upstreams: HashMap<String, UpstreamConfig>,

    /// Rate-limit quotas per route class and the optional shared store
    pub rate_limits: RateLimitSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstreams: default_upstreams(),
            rate_limits: RateLimitSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    /// and validate.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults plus environment overrides only.
    ///
    /// This is how the container deployments run: no file, everything from
    /// `AUTH_SERVICE_URL`, `JWT_SECRET`, and friends.
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration.
    ///
    /// Gateway-specific knobs use the `GATEWAY_` prefix; the service URL and
    /// secret variables keep the names the rest of the GoCart deployment
    /// already uses.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PORT: {}", e)))?;
        }

        if let Ok(size) = env::var("GATEWAY_MAX_BODY_SIZE") {
            self.server.max_body_size = size.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_MAX_BODY_SIZE: {}", e))
            })?;
        }

        if let Ok(grace) = env::var("GATEWAY_SHUTDOWN_GRACE") {
            self.server.shutdown_grace = humantime::parse_duration(&grace).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SHUTDOWN_GRACE: {}", e))
            })?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(url) = env::var("AUTH_SERVICE_URL") {
            if let Some(upstream) = self.upstreams.get_mut("auth") {
                upstream.base_url = url;
            }
        }

        if let Ok(url) = env::var("PAYMENT_SERVICE_URL") {
            if let Some(upstream) = self.upstreams.get_mut("payment") {
                upstream.base_url = url;
            }
        }

        if let Ok(url) = env::var("BACKEND_URL") {
            if let Some(upstream) = self.upstreams.get_mut("backend") {
                upstream.base_url = url;
            }
        }

        if let Ok(url) = env::var("REDIS_URL") {
            self.rate_limits.redis_url = Some(url);
        }

        if let Ok(timeout) = env::var("GATEWAY_UPSTREAM_TIMEOUT") {
            let timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_UPSTREAM_TIMEOUT: {}", e))
            })?;
            for upstream in self.upstreams.values_mut() {
                upstream.timeout = timeout;
            }
        }

        Ok(())
    }

    /// Comprehensive configuration validation with detailed error messages.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.port == 0 {
            errors.push("server port must be non-zero".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            errors.push("auth.jwt_secret cannot be empty".to_string());
        }

        if self.upstreams.is_empty() {
            errors.push("at least one upstream must be configured".to_string());
        }

        for (name, upstream) in &self.upstreams {
            match Url::parse(&upstream.base_url) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => errors.push(format!(
                    "upstream '{}' has unsupported scheme '{}'",
                    name,
                    url.scheme()
                )),
                Err(e) => errors.push(format!("upstream '{}' has invalid base_url: {}", name, e)),
            }

            if upstream.timeout.is_zero() {
                errors.push(format!("upstream '{}' timeout must be greater than 0", name));
            }

            if upstream.retries > 10 {
                errors.push(format!(
                    "upstream '{}' retries must be small and bounded (max 10)",
                    name
                ));
            }
        }

        for class in [
            RouteClass::General,
            RouteClass::Auth,
            RouteClass::Payment,
            RouteClass::Upload,
        ] {
            let quota = self.rate_limits.quota(class);
            if quota.limit == 0 {
                errors.push(format!("rate limit for class '{}' must be non-zero", class));
            }
            if quota.window.is_zero() {
                errors.push(format!(
                    "rate limit window for class '{}' must be non-zero",
                    class
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Maximum accepted request body size in bytes
    pub max_body_size: usize,

    /// How long to wait for in-flight requests during shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            // Matches the body cap the services accept
            max_body_size: 10 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Token verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the auth service
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
        }
    }
}

/// A single upstream service target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL the gateway forwards to (scheme + authority)
    pub base_url: String,

    /// Bounded per-request timeout for calls to this upstream
    #[serde(with = "humantime_serde", default = "default_upstream_timeout")]
    pub timeout: Duration,

    /// Maximum connect retries before giving up (timeouts are never retried)
    #[serde(default = "default_upstream_retries")]
    pub retries: u32,

    /// Path rewrite rules applied before forwarding; first matching prefix wins
    #[serde(default)]
    pub rewrites: Vec<RewriteRule>,
}

/// Prefix rewrite applied to the request path before forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    /// Inbound path prefix to match
    pub prefix: String,
    /// Replacement for the matched prefix (may be empty to strip it)
    pub replacement: String,
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upstream_retries() -> u32 {
    3
}

/// The three GoCart upstreams with their deployment-default addresses and
/// the path rewrites each service expects.
fn default_upstreams() -> HashMap<String, UpstreamConfig> {
    let mut upstreams = HashMap::new();

    upstreams.insert(
        "auth".to_string(),
        UpstreamConfig {
            base_url: "http://localhost:3001".to_string(),
            timeout: default_upstream_timeout(),
            retries: default_upstream_retries(),
            // The auth service mounts its routes at the root
            rewrites: vec![RewriteRule {
                prefix: "/auth".to_string(),
                replacement: String::new(),
            }],
        },
    );

    upstreams.insert(
        "payment".to_string(),
        UpstreamConfig {
            base_url: "http://localhost:3002".to_string(),
            timeout: default_upstream_timeout(),
            retries: default_upstream_retries(),
            rewrites: vec![
                // Stripe webhook lands on /webhook upstream-side
                RewriteRule {
                    prefix: "/payments/webhook".to_string(),
                    replacement: "/webhook".to_string(),
                },
                RewriteRule {
                    prefix: "/payments".to_string(),
                    replacement: String::new(),
                },
                // Payouts keep their prefix
            ],
        },
    );

    upstreams.insert(
        "backend".to_string(),
        UpstreamConfig {
            base_url: "http://localhost:5000".to_string(),
            timeout: default_upstream_timeout(),
            retries: default_upstream_retries(),
            rewrites: vec![
                // Catalog module owns products and artworks
                RewriteRule {
                    prefix: "/api/products".to_string(),
                    replacement: "/api/catalog/products".to_string(),
                },
                RewriteRule {
                    prefix: "/api/artworks".to_string(),
                    replacement: "/api/catalog/artworks".to_string(),
                },
            ],
        },
    );

    upstreams
}

/// Quota for one route class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum requests allowed per window
    pub limit: u32,

    /// Rolling window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Per-class quotas plus the optional shared counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Redis connection string; when set, counters are shared across gateway
    /// instances instead of living in process memory
    pub redis_url: Option<String>,

    /// Key prefix for counter keys in the shared store
    pub key_prefix: String,

    pub general: Quota,
    pub auth: Quota,
    pub payment: Quota,
    pub upload: Quota,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "rate_limit".to_string(),
            general: Quota {
                limit: 100,
                window: Duration::from_secs(15 * 60),
            },
            auth: Quota {
                limit: 5,
                window: Duration::from_secs(15 * 60),
            },
            payment: Quota {
                limit: 10,
                window: Duration::from_secs(60),
            },
            upload: Quota {
                limit: 20,
                window: Duration::from_secs(60),
            },
        }
    }
}

impl RateLimitSettings {
    /// Quota for a route class.
    pub fn quota(&self, class: RouteClass) -> &Quota {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Auth => &self.auth,
            RouteClass::Payment => &self.payment,
            RouteClass::Upload => &self.upload,
        }
    }
}
