// =============================================================================
// Matrixon Homeserver Core - Rate Limiting
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   Per-peer-address token-bucket rate limiting applied before routing, raising 
//   M_LIMIT_EXCEEDED once a bucket is drained.
//
// Performance Targets:
//   • O(1) bucket lookup and refill per request
//
// Architecture:
//   • Token bucket keyed on the caller's IP, refilled lazily on access
// =============================================================================

//! Per-address token-bucket rate limiting (`Config.rateLimit`), invoked
//! before routing. Not named explicitly in the router's own design, but
//! implied by `M_LIMIT_EXCEEDED` being in the error-kind list with
//! nothing else in the core that would raise it.

use matrixon_core::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `key` (typically the client's socket
    /// address). Returns `false` when the bucket is empty and the
    /// caller should respond `M_LIMIT_EXCEEDED`.
    pub fn check(&self, key: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.burst as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.per_second as f64)
            .min(self.config.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_bursts_up_to_the_configured_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            per_second: 1,
            burst: 3,
        });
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            per_second: 0,
            burst: 0,
        });
        for _ in 0..10 {
            assert!(limiter.check("1.2.3.4"));
        }
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            per_second: 1,
            burst: 1,
        });
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }
}
