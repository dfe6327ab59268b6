//! Advisory distributed lock.
//!
//! Acquire is set-if-absent with expiry; release is compare-and-delete on the
//! holder's random token, so a holder whose lock expired (and was taken by
//! someone else) cannot release the new holder's lock.

use crate::config::LockConfig;
use crate::error::Result;
use crate::kv::{KvStore, SetCondition};
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Proof of holding a lock. 128 random bits, hex-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the prefix; the full token is a release capability.
        write!(f, "LockToken({}..)", &self.0[..8])
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_defaults(kv, &LockConfig::default())
    }

    pub fn with_defaults(kv: Arc<dyn KvStore>, config: &LockConfig) -> Self {
        Self {
            kv,
            ttl: Duration::from_millis(config.ttl_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Acquire with the configured TTL and retry budget.
    pub async fn lock(&self, key: &str) -> Result<Option<LockToken>> {
        self.acquire(key, self.ttl, self.max_retries, self.retry_delay)
            .await
    }

    /// Up to `max_retries` set-if-absent attempts, `retry_delay` apart.
    /// `Ok(None)` means the lock stayed held for the whole budget.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Option<LockToken>> {
        let token = LockToken::generate();
        let attempts = max_retries.max(1);

        for attempt in 1..=attempts {
            if self
                .kv
                .set(key, token.as_str(), Some(ttl), SetCondition::IfAbsent)
                .await?
            {
                debug!(key, attempt, "Lock acquired");
                return Ok(Some(token));
            }
            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        debug!(key, attempts, "Lock still held, giving up");
        Ok(None)
    }

    /// Release only if `token` still owns `key`.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let released = self.kv.compare_and_delete(key, token.as_str()).await?;
        if !released {
            debug!(key, "Lock no longer held by this token");
        }
        Ok(released)
    }
}
