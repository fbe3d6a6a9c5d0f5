//! # Upstream Health Probes
//!
//! Backs the gateway's `/status` endpoint: probes each upstream's `/health`
//! route with a short timeout and caches the result so status polling never
//! hammers the services.

use dashmap::DashMap;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::proxy::{Upstream, UpstreamSet};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Probe result for one upstream, as serialized into `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub healthy: bool,
    /// Probe round-trip in milliseconds, when the probe completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct CachedStatus {
    status: UpstreamStatus,
    checked_at: Instant,
}

/// Cached upstream health prober.
pub struct HealthChecker {
    http: HttpClient,
    cache: DashMap<String, CachedStatus>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            cache: DashMap::new(),
        }
    }

    /// Status of every upstream, probing only the ones whose cached result
    /// has gone stale.
    pub async fn check_all(&self, upstreams: &UpstreamSet) -> Vec<UpstreamStatus> {
        let mut statuses = Vec::new();
        for upstream in upstreams.iter() {
            statuses.push(self.check(upstream).await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn check(&self, upstream: &Arc<Upstream>) -> UpstreamStatus {
        if let Some(cached) = self.cache.get(&upstream.name) {
            if cached.checked_at.elapsed() < CACHE_TTL {
                return cached.status.clone();
            }
        }

        let status = self.probe(upstream).await;
        self.cache.insert(
            upstream.name.clone(),
            CachedStatus {
                status: status.clone(),
                checked_at: Instant::now(),
            },
        );
        status
    }

    async fn probe(&self, upstream: &Arc<Upstream>) -> UpstreamStatus {
        let url = format!("{}/health", upstream.base_url);
        let started = Instant::now();

        debug!(upstream = %upstream.name, url = %url, "probing upstream health");

        match timeout(PROBE_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(response)) => UpstreamStatus {
                name: upstream.name.clone(),
                healthy: response.status().is_success(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: if response.status().is_success() {
                    None
                } else {
                    Some(format!("status {}", response.status().as_u16()))
                },
            },
            Ok(Err(err)) => UpstreamStatus {
                name: upstream.name.clone(),
                healthy: false,
                latency_ms: None,
                error: Some(err.to_string()),
            },
            Err(_) => UpstreamStatus {
                name: upstream.name.clone(),
                healthy: false,
                latency_ms: None,
                error: Some(format!("probe timed out after {:?}", PROBE_TIMEOUT)),
            },
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
