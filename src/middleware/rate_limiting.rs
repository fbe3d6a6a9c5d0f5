//! # Rate Limiting
//!
//! Fixed-window rate limiting per route class, keyed by user id when a
//! principal is known and by client IP otherwise.
//!
//! The only mutable shared state in the gateway lives here. Counters use a
//! single atomic increment-with-expiry operation through the
//! [`RateLimitStore`] trait so concurrent requests from the same key never
//! under-count:
//! - [`InMemoryStore`]: per-process counters in a `DashMap`
//! - [`RedisStore`]: `INCR` + `EXPIRE`, shared across gateway instances so a
//!   fleet enforces one quota per key

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, Client as RedisClient};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::core::config::RateLimitSettings;
use crate::core::types::{Principal, RouteClass};

/// Errors from the counter store.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of a quota check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// How long the caller should wait before retrying, when denied
    pub retry_after: Option<Duration>,
}

/// Atomic counter storage with expiry.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter for `key`, starting a window of `ttl` on first
    /// touch, and return the post-increment count.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RateLimitError>;

    /// Drop the counter for `key`.
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;
}

/// In-memory counter store. Per-process only; use [`RedisStore`] when more
/// than one gateway instance serves traffic.
pub struct InMemoryStore {
    counters: DashMap<String, (u64, Instant)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Drop expired windows. Called opportunistically; correctness does not
    /// depend on it since expired entries are reset on next increment.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RateLimitError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| (0, now + ttl));

        let value = entry.value_mut();
        if value.1 <= now {
            // Window elapsed; start a fresh one
            value.0 = 0;
            value.1 = now + ttl;
        }
        value.0 += 1;
        Ok(value.0)
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.counters.remove(key);
        Ok(())
    }
}

/// Redis-backed counter store shared across gateway instances.
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = RedisClient::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RateLimitError> {
        let mut conn = self.client.get_async_connection().await?;
        let count: u64 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.client.get_async_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// The per-class fixed-window limiter.
pub struct RateLimiter {
    settings: RateLimitSettings,
    store: Arc<dyn RateLimitStore>,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    /// Build a limiter from settings, choosing the Redis store when a URL is
    /// configured and the in-memory store otherwise.
    pub fn from_settings(settings: RateLimitSettings) -> Result<Self, RateLimitError> {
        let store: Arc<dyn RateLimitStore> = match &settings.redis_url {
            Some(url) => Arc::new(RedisStore::new(url)?),
            None => Arc::new(InMemoryStore::new()),
        };
        Ok(Self::with_store(settings, store))
    }

    /// Build a limiter over an explicit store.
    pub fn with_store(settings: RateLimitSettings, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            settings,
            store,
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Check the quota for one request. Keys by user id when the request is
    /// authenticated, client IP otherwise, so a user roaming across addresses
    /// draws from one bucket and anonymous clients from another.
    pub async fn check(
        &self,
        class: RouteClass,
        principal: Option<&Principal>,
        client_ip: IpAddr,
    ) -> Result<RateLimitResult, RateLimitError> {
        let quota = self.settings.quota(class);
        let key = self.key_for(class, principal, client_ip);

        debug!(key = %key, limit = quota.limit, window = ?quota.window, "checking rate limit");

        let count = self.store.increment(&key, quota.window).await?;
        let allowed = count <= quota.limit as u64;

        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }

        Ok(RateLimitResult {
            allowed,
            remaining: (quota.limit as u64).saturating_sub(count) as u32,
            retry_after: if allowed { None } else { Some(quota.window) },
        })
    }

    fn key_for(&self, class: RouteClass, principal: Option<&Principal>, client_ip: IpAddr) -> String {
        match principal {
            Some(p) => format!("{}:{}:user:{}", self.settings.key_prefix, class, p.id),
            None => format!("{}:{}:ip:{}", self.settings.key_prefix, class, client_ip),
        }
    }

    /// (allowed, denied) counts since startup.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.allowed.load(Ordering::Relaxed),
            self.denied.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Quota;
    use crate::core::types::Role;

    fn settings(limit: u32, window: Duration) -> RateLimitSettings {
        let quota = Quota { limit, window };
        RateLimitSettings {
            redis_url: None,
            key_prefix: "test".to_string(),
            general: quota.clone(),
            auth: quota.clone(),
            payment: quota.clone(),
            upload: quota,
        }
    }

    fn limiter(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::with_store(settings(limit, window), Arc::new(InMemoryStore::new()))
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let limiter = limiter(3, Duration::from_secs(60));

        for i in 0..3 {
            let result = limiter
                .check(RouteClass::General, None, ip(1))
                .await
                .unwrap();
            assert!(result.allowed, "request {} should be allowed", i);
        }

        let result = limiter
            .check(RouteClass::General, None, ip(1))
            .await
            .unwrap();
        assert!(!result.allowed, "fourth request must be denied");
        assert_eq!(result.remaining, 0);
        assert!(result.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);
        assert!(!limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);
        // A different IP has its own bucket
        assert!(limiter.check(RouteClass::General, None, ip(2)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_classes_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.check(RouteClass::Auth, None, ip(1)).await.unwrap().allowed);
        assert!(!limiter.check(RouteClass::Auth, None, ip(1)).await.unwrap().allowed);
        // Exhausting the auth bucket leaves the payment bucket untouched
        assert!(limiter.check(RouteClass::Payment, None, ip(1)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_authenticated_requests_key_by_user() {
        let limiter = limiter(1, Duration::from_secs(60));
        let principal = Principal {
            id: "user-7".to_string(),
            email: "u@example.com".to_string(),
            role: Role::Customer,
        };

        assert!(limiter
            .check(RouteClass::General, Some(&principal), ip(1))
            .await
            .unwrap()
            .allowed);
        // Same user from another address draws from the same bucket
        assert!(!limiter
            .check(RouteClass::General, Some(&principal), ip(2))
            .await
            .unwrap()
            .allowed);
        // Anonymous traffic from the first address is unaffected
        assert!(limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_the_count() {
        let limiter = limiter(1, Duration::from_millis(50));

        assert!(limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);
        assert!(!limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(RouteClass::General, None, ip(1)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_undercount() {
        let limiter = Arc::new(limiter(50, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check(RouteClass::General, None, ip(1)).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[tokio::test]
    async fn test_in_memory_cleanup() {
        let store = InMemoryStore::new();
        store.increment("k", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.cleanup_expired();
        // A fresh window starts at 1 either way
        assert_eq!(store.increment("k", Duration::from_secs(10)).await.unwrap(), 1);
    }
}
