//! # Gateway Server
//!
//! Wires the pipeline together and runs the HTTP listener. Every inbound
//! request that is not `/health` or `/status` goes through the fallback
//! handler, which runs the stages in a fixed order:
//!
//! 1. resolve the route policy for the path,
//! 2. cap and buffer the request body,
//! 3. authenticate (required for protected routes, opportunistic for public),
//! 4. authorize the principal against the policy,
//! 5. charge the rate-limit quota,
//! 6. forward to the resolved upstream.
//!
//! Authentication runs before rate limiting so the limiter can key by user
//! id instead of address. A rate-limit storage failure lets the request
//! through rather than taking the marketplace down with the counter store.

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{extract_bearer, JwtVerifier};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Principal;
use crate::middleware::RateLimiter;
use crate::observability::HealthChecker;
use crate::proxy::client::ForwardContext;
use crate::proxy::{ProxyClient, UpstreamSet};
use crate::routing::PolicyTable;

/// Shared per-process state behind every handler.
pub struct ServerState {
    pub config: GatewayConfig,
    pub policies: PolicyTable,
    pub verifier: JwtVerifier,
    pub limiter: RateLimiter,
    pub proxy: ProxyClient,
    pub upstreams: UpstreamSet,
    pub health: HealthChecker,
    pub started_at: Instant,
}

/// The gateway server: state plus the listener lifecycle.
pub struct GatewayServer {
    state: Arc<ServerState>,
}

impl GatewayServer {
    /// Build the full pipeline from validated configuration.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let policies = PolicyTable::gocart_defaults()?;

        // Every upstream the route table names must be configured, or
        // requests would fail at forward time instead of at startup.
        for name in policies.upstream_names() {
            if !config.upstreams.contains_key(&name) {
                return Err(GatewayError::config(format!(
                    "route table references unconfigured upstream '{}'",
                    name
                )));
            }
        }

        let verifier = JwtVerifier::new(&config.auth.jwt_secret);
        let limiter = RateLimiter::from_settings(config.rate_limits.clone())
            .map_err(|e| GatewayError::config(format!("rate limiter init failed: {}", e)))?;
        let proxy = ProxyClient::new()?;
        let upstreams = UpstreamSet::from_config(&config.upstreams);

        Ok(Self {
            state: Arc::new(ServerState {
                config,
                policies,
                verifier,
                limiter,
                proxy,
                upstreams,
                health: HealthChecker::new(),
                started_at: Instant::now(),
            }),
        })
    }

    /// Build the axum application. Split out from [`Self::start`] so tests
    /// can drive the router directly without a listener.
    pub fn app(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .fallback(pipeline_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the listener and serve until a shutdown signal arrives.
    pub async fn start(&self) -> GatewayResult<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.server.bind_address, self.state.config.server.port
        );
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            GatewayError::config(format!("failed to bind {}: {}", addr, e))
        })?;

        info!("🚀 GoCart gateway listening on {}", addr);
        for upstream in self.state.upstreams.iter() {
            info!("  ↳ upstream '{}' -> {}", upstream.name, upstream.base_url);
        }

        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(
            listener,
            self.app()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = drain_tx.send(());
        });

        run_until_drained(
            server.into_future(),
            drain_rx,
            self.state.config.server.shutdown_grace,
        )
        .await?;

        info!("👋 Gateway shut down cleanly");
        Ok(())
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }
}

/// Drive the server to completion, but once draining starts give in-flight
/// requests at most `grace` before giving up on them.
async fn run_until_drained<S>(
    server: S,
    draining: tokio::sync::oneshot::Receiver<()>,
    grace: Duration,
) -> GatewayResult<()>
where
    S: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = server => {
            result.map_err(|e| GatewayError::internal(format!("server error: {}", e)))
        }
        _ = async {
            let _ = draining.await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("⏱️ Shutdown grace of {:?} elapsed, dropping remaining connections", grace);
            Ok(())
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Received SIGINT, shutting down"),
        _ = terminate => info!("🛑 Received SIGTERM, shutting down"),
    }
}

/// Gateway liveness. Answers locally; upstream health lives on `/status`.
async fn health_handler(State(state): State<Arc<ServerState>>) -> Response {
    Json(json!({
        "success": true,
        "status": "ok",
        "service": "gocart-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

/// Gateway plus upstream status, with cached probes.
async fn status_handler(State(state): State<Arc<ServerState>>) -> Response {
    let upstreams = state.health.check_all(&state.upstreams).await;
    let all_healthy = upstreams.iter().all(|u| u.healthy);
    let (allowed, denied) = state.limiter.counters();

    let body = Json(json!({
        "success": true,
        "status": if all_healthy { "ok" } else { "degraded" },
        "service": "gocart-gateway",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "upstreams": upstreams,
        "rate_limits": { "allowed": allowed, "denied": denied },
    }));

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body).into_response()
}

/// The authenticated proxying pipeline. Every stage short-circuits into a
/// rejection response via `GatewayError`.
async fn pipeline_handler(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    // Keep a caller-supplied request id so traces correlate across hops
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(&request);

    let result = run_pipeline(&state, request, &request_id, client_ip).await;

    match result {
        Ok(response) => {
            info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                client_ip = %client_ip,
                request_id = %request_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request forwarded"
            );
            response
        }
        Err(err) => {
            info!(
                method = %method,
                path = %path,
                status = err.status_code().as_u16(),
                code = err.code(),
                client_ip = %client_ip,
                request_id = %request_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request rejected"
            );
            err.into_response()
        }
    }
}

async fn run_pipeline(
    state: &ServerState,
    request: Request,
    request_id: &str,
    client_ip: IpAddr,
) -> GatewayResult<Response> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(|q| q.to_string());

    let policy = state.policies.resolve(&path);

    let limit = state.config.server.max_body_size;
    let body = to_bytes(body, limit)
        .await
        .map_err(|_| GatewayError::PayloadTooLarge { limit })?;

    let principal = authenticate(state, &parts.headers, policy.access.requires_authentication())?;

    policy.access.permits(principal.as_ref())?;

    match state
        .limiter
        .check(policy.class, principal.as_ref(), client_ip)
        .await
    {
        Ok(result) if !result.allowed => {
            return Err(GatewayError::RateLimitExceeded {
                retry_after: result.retry_after.unwrap_or_default(),
            });
        }
        Ok(_) => {}
        Err(err) => {
            // Counter store failure: serving without a quota beats refusing
            // all traffic
            warn!(error = %err, "rate limit store unavailable, allowing request");
        }
    }

    let upstream = state.upstreams.get(&policy.upstream)?;
    let ctx = ForwardContext {
        principal: principal.as_ref(),
        client_ip,
        request_id,
    };

    state
        .proxy
        .forward(
            &upstream,
            &parts.method,
            &path,
            query.as_deref(),
            &parts.headers,
            body,
            &ctx,
        )
        .await
}

/// Authenticate the request. Protected routes require a valid token;
/// public routes verify opportunistically so upstreams can personalize,
/// but a bad token never rejects a public request.
fn authenticate(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
    required: bool,
) -> GatewayResult<Option<Principal>> {
    match extract_bearer(headers) {
        Some(token) => match state.verifier.verify(token) {
            Ok(principal) => Ok(Some(principal)),
            Err(err) if required => Err(err),
            Err(_) => Ok(None),
        },
        None if required => Err(GatewayError::AuthRequired),
        None => Ok(None),
    }
}

/// Connecting address from the listener. Requests driven without a socket
/// (tests, in-process calls) count as loopback.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use axum::http::{HeaderMap, HeaderValue};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    fn state() -> ServerState {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "pipeline-test-secret".to_string();
        let server = GatewayServer::from_config(config).unwrap();
        Arc::try_unwrap(server.state).ok().unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn mint(role: &str) -> String {
        let claims = Claims {
            user_id: "user-1".to_string(),
            email: "u@example.com".to_string(),
            role: role.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"pipeline-test-secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_drain_window_is_bounded() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        // Draining has started but an in-flight connection never finishes
        let server = std::future::pending::<std::io::Result<()>>();
        tx.send(()).unwrap();

        let started = Instant::now();
        run_until_drained(server, rx, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_clean_shutdown_finishes_before_grace() {
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let started = Instant::now();
        run_until_drained(async { Ok(()) }, rx, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unconfigured_upstream_is_a_startup_error() {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "s".to_string();
        config.upstreams.remove("payment");
        let err = GatewayServer::from_config(config).err().unwrap();
        assert!(err.to_string().contains("payment"));
    }

    #[test]
    fn test_required_auth_without_token() {
        let state = state();
        match authenticate(&state, &HeaderMap::new(), true) {
            Err(GatewayError::AuthRequired) => {}
            other => panic!("expected AuthRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_auth_without_token_is_anonymous() {
        let state = state();
        assert!(authenticate(&state, &HeaderMap::new(), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_valid_token_yields_principal_either_way() {
        let state = state();
        let headers = bearer(&mint("artist"));
        for required in [true, false] {
            let principal = authenticate(&state, &headers, required).unwrap().unwrap();
            assert_eq!(principal.id, "user-1");
        }
    }

    #[test]
    fn test_bad_token_rejects_only_protected_routes() {
        let state = state();
        let headers = bearer("not.a.token");

        match authenticate(&state, &headers, true) {
            Err(GatewayError::InvalidToken { .. }) => {}
            other => panic!("expected InvalidToken, got {:?}", other),
        }
        // Public route: the bad token is ignored, not fatal
        assert!(authenticate(&state, &headers, false).unwrap().is_none());
    }
}
