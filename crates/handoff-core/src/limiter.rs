//! Sliding-window rate limiter over a [`KvStore`] ordered set.
//!
//! Each admitted request adds a member scored by its timestamp (epoch ms).
//! A check first evicts members older than the window, then admits the
//! request only while the remaining count is under the limit.

use crate::error::Result;
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Outcome of a limiter check. `reset_at` is epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
}

pub struct SlidingWindowLimiter {
    kv: Arc<dyn KvStore>,
    // Serializes evict/count/add so in-process checks cannot overshoot.
    gate: Mutex<()>,
}

impl SlidingWindowLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            gate: Mutex::new(()),
        }
    }

    pub async fn check(&self, key: &str, limit: u32, window_secs: u64) -> Result<RateLimitStatus> {
        self.check_at(key, limit, window_secs, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub(crate) async fn check_at(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now_ms: i64,
    ) -> Result<RateLimitStatus> {
        let _gate = self.gate.lock().await;
        let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let window_start = now_ms.saturating_sub(window_ms);

        self.kv
            .zremrangebyscore(key, i64::MIN, window_start.saturating_sub(1))
            .await?;
        let count = self.kv.zcard(key).await?;

        if count >= limit as usize {
            let oldest = self.kv.zmin_score(key).await?.unwrap_or(now_ms);
            return Ok(RateLimitStatus {
                allowed: false,
                remaining: 0,
                reset_at: oldest.saturating_add(window_ms),
            });
        }

        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
        self.kv.zadd(key, now_ms, &member).await?;
        self.kv.expire(key, Duration::from_secs(window_secs)).await?;

        let oldest = self.kv.zmin_score(key).await?.unwrap_or(now_ms);
        Ok(RateLimitStatus {
            allowed: true,
            remaining: limit.saturating_sub(count as u32 + 1),
            reset_at: oldest.saturating_add(window_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_limit_three_per_minute() {
        let limiter = limiter();
        let now = 1_700_000_000_000;

        let mut remaining = Vec::new();
        for i in 0..3 {
            let status = limiter.check_at("ratelimit:create:u1", 3, 60, now + i).await.unwrap();
            assert!(status.allowed);
            remaining.push(status.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("ratelimit:create:u1", 3, 60, now + 10).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, now + 60_000);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = limiter();
        let now = 1_700_000_000_000;

        assert!(limiter.check_at("k", 2, 60, now).await.unwrap().allowed);
        assert!(limiter.check_at("k", 2, 60, now + 30_000).await.unwrap().allowed);
        assert!(!limiter.check_at("k", 2, 60, now + 59_000).await.unwrap().allowed);

        // The first request has left the window.
        let status = limiter.check_at("k", 2, 60, now + 60_001).await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.reset_at, now + 30_000 + 60_000);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter();
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("a", 1, 60, now).await.unwrap().allowed);
        assert!(!limiter.check_at("a", 1, 60, now).await.unwrap().allowed);
        assert!(limiter.check_at("b", 1, 60, now).await.unwrap().allowed);
    }
}
