//! # Upstream Forwarding
//!
//! The reverse-proxy leg of the pipeline: path rewriting, header hygiene,
//! identity injection, and the actual HTTP call to the resolved upstream.
//!
//! Header rules, in order:
//! - hop-by-hop headers and `host` are dropped in both directions,
//! - inbound copies of the injected headers are dropped so a client can
//!   never smuggle an identity past the gateway,
//! - `X-User-ID` / `X-User-Role` are added exactly once, and only when the
//!   request carries a verified principal,
//! - `X-Forwarded-For` appends the connecting address to whatever chain an
//!   earlier proxy already built; `X-Real-IP` is always the connecting
//!   address,
//! - everything else (including `Authorization`) passes through untouched.
//!
//! Calls are bounded by the upstream's configured timeout. Connect failures
//! retry with exponential backoff and jitter up to the configured budget;
//! timeouts never retry, since the upstream may still be processing the
//! first attempt.

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use rand::Rng;
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::{RewriteRule, UpstreamConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Principal;

/// Request headers that must not be copied to the upstream. Hop-by-hop
/// headers per RFC 9110, plus the ones the HTTP client computes itself.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Headers the gateway owns. Inbound copies are dropped before injection so
/// each reaches the upstream at most once, and only with gateway-set values.
const GATEWAY_OWNED: &[&str] = &[
    "x-gateway",
    "x-request-id",
    "x-real-ip",
    "x-user-id",
    "x-user-role",
];

/// A single upstream target resolved from configuration.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub name: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    rewrites: Vec<RewriteRule>,
}

impl Upstream {
    pub fn from_config(name: &str, config: &UpstreamConfig) -> Self {
        Self {
            name: name.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            retries: config.retries,
            rewrites: config.rewrites.clone(),
        }
    }

    /// Apply this upstream's rewrite rules to an inbound path. The first
    /// matching prefix wins, so more specific rules must be listed first.
    pub fn rewrite_path(&self, path: &str) -> String {
        for rule in &self.rewrites {
            if let Some(rest) = path.strip_prefix(rule.prefix.as_str()) {
                let rewritten = format!("{}{}", rule.replacement, rest);
                if rewritten.is_empty() {
                    return "/".to_string();
                }
                return rewritten;
            }
        }
        path.to_string()
    }
}

/// The named upstreams the policy table can forward to.
pub struct UpstreamSet {
    upstreams: HashMap<String, Arc<Upstream>>,
}

impl UpstreamSet {
    pub fn from_config(configs: &HashMap<String, UpstreamConfig>) -> Self {
        let upstreams = configs
            .iter()
            .map(|(name, config)| (name.clone(), Arc::new(Upstream::from_config(name, config))))
            .collect();
        Self { upstreams }
    }

    /// Look up an upstream by the name a route policy references. Startup
    /// validation guarantees every policy target exists, so a miss here is
    /// an internal error, not a client-facing one.
    pub fn get(&self, name: &str) -> GatewayResult<Arc<Upstream>> {
        self.upstreams
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::internal(format!("unknown upstream '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.upstreams.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Upstream>> {
        self.upstreams.values()
    }
}

/// Identity and tracing context injected into every forwarded request.
pub struct ForwardContext<'a> {
    pub principal: Option<&'a Principal>,
    pub client_ip: IpAddr,
    pub request_id: &'a str,
}

/// The forwarding client. One shared `reqwest` client with pooled
/// connections; per-request timeouts come from the upstream config.
pub struct ProxyClient {
    http: HttpClient,
}

impl ProxyClient {
    pub fn new() -> GatewayResult<Self> {
        let http = HttpClient::builder()
            // Timeouts are set per request from the upstream config
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Forward one request to `upstream` and return the upstream's response
    /// verbatim (status, headers, body), minus hop-by-hop headers.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
        ctx: &ForwardContext<'_>,
    ) -> GatewayResult<Response> {
        let rewritten = upstream.rewrite_path(path);
        let url = match query {
            Some(q) => format!("{}{}?{}", upstream.base_url, rewritten, q),
            None => format!("{}{}", upstream.base_url, rewritten),
        };

        let outbound_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| GatewayError::internal(format!("invalid method: {}", e)))?;
        let outbound_headers = build_outbound_headers(headers, ctx);

        debug!(
            upstream = %upstream.name,
            method = %method,
            path = %path,
            target = %url,
            request_id = %ctx.request_id,
            "forwarding request"
        );

        let response = self
            .send_with_retries(upstream, outbound_method, &url, outbound_headers, body)
            .await?;

        convert_response(response)
    }

    /// Issue the request, retrying connect failures only. The total attempt
    /// count is `1 + retries`; each retry backs off exponentially with
    /// jitter so a recovering upstream is not hit by synchronized waves.
    async fn send_with_retries(
        &self,
        upstream: &Upstream,
        method: reqwest::Method,
        url: &str,
        headers: reqwest::header::HeaderMap,
        body: Bytes,
    ) -> GatewayResult<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .request(method.clone(), url)
                .headers(headers.clone())
                .timeout(upstream.timeout)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() && attempt < upstream.retries => {
                    attempt += 1;
                    let backoff = backoff_delay(attempt);
                    warn!(
                        upstream = %upstream.name,
                        attempt,
                        max = upstream.retries,
                        delay_ms = backoff.as_millis() as u64,
                        "upstream connect failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    warn!(upstream = %upstream.name, error = %err, "upstream request failed");
                    let reason = if err.is_timeout() {
                        format!("timed out after {:?}", upstream.timeout)
                    } else {
                        err.to_string()
                    };
                    return Err(GatewayError::UpstreamUnavailable {
                        upstream: upstream.name.clone(),
                        reason,
                    });
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(50) * 2u32.saturating_pow(attempt - 1);
    let jitter = rand::thread_rng().gen_range(0..50);
    base + Duration::from_millis(jitter)
}

/// Build the outbound header map: copy what passes through, then inject the
/// gateway's own headers. Returns `reqwest` header types since the HTTP
/// client speaks an older `http` crate than the server does.
fn build_outbound_headers(
    inbound: &HeaderMap,
    ctx: &ForwardContext<'_>,
) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderName, HeaderValue};

    let mut outbound = reqwest::header::HeaderMap::new();

    let mut forwarded_chain: Option<String> = None;
    for (name, value) in inbound {
        let lower = name.as_str();
        if lower == "x-forwarded-for" {
            // Captured for appending below rather than copied through
            if let Ok(chain) = value.to_str() {
                forwarded_chain = Some(chain.to_string());
            }
            continue;
        }
        if HOP_BY_HOP.contains(&lower) || GATEWAY_OWNED.contains(&lower) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            outbound.append(n, v);
        }
    }

    let client_ip = ctx.client_ip.to_string();
    let chain = match forwarded_chain {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip.clone(),
    };

    // The services use this marker to tell gateway traffic from direct calls
    insert_str(&mut outbound, "x-gateway", "true");
    insert_str(&mut outbound, "x-request-id", ctx.request_id);
    insert_str(&mut outbound, "x-real-ip", &client_ip);
    insert_str(&mut outbound, "x-forwarded-for", &chain);

    if let Some(principal) = ctx.principal {
        insert_str(&mut outbound, "x-user-id", &principal.id);
        insert_str(&mut outbound, "x-user-role", principal.role.as_str());
    }

    outbound
}

fn insert_str(headers: &mut reqwest::header::HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = reqwest::header::HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Convert the upstream's response into a server-side one, streaming the
/// body through instead of buffering it.
fn convert_response(response: reqwest::Response) -> GatewayResult<Response> {
    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| GatewayError::internal(format!("invalid upstream status: {}", e)))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) {
            continue;
        }
        builder = builder.header(lower, value.as_bytes());
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| GatewayError::internal(format!("failed to build response: {}", e)))
}
