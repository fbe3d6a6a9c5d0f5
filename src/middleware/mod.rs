pub mod rate_limiting;

pub use rate_limiting::{
    InMemoryStore, RateLimitError, RateLimitResult, RateLimitStore, RateLimiter, RedisStore,
};
