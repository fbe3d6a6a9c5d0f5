//! Tracing subscriber setup.
//!
//! `RUST_LOG` controls the filter; without it the gateway and tower-http
//! log at info. `GATEWAY_LOG_FORMAT=json` switches to structured output for
//! the container deployments.

use tracing_subscriber::{fmt, EnvFilter};

use crate::core::error::{GatewayError, GatewayResult};

const DEFAULT_FILTER: &str = "gocart_gateway=info,tower_http=info";

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging() -> GatewayResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("GATEWAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(env_filter).try_init()
    };

    result.map_err(|e| GatewayError::internal(format!("failed to init logging: {}", e)))
}
