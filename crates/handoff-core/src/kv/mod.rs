//! Remote key/value store contract.
//!
//! The cache-aside layer, the distributed lock and the sliding-window limiter
//! are all written against [`KvStore`]. The operations mirror what a shared
//! cache server offers: plain string keys with TTL and conditional set, an
//! atomic compare-and-delete, and ordered sets scored by integers.
//!
//! Every call is fallible; callers decide whether a failure is fatal. Within
//! the coordinator it never is.

mod memory;

pub use memory::MemoryKv;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Condition attached to [`KvStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Unconditional write.
    #[default]
    Always,
    /// Write only when the key does not exist (`NX`).
    IfAbsent,
    /// Write only when the key already exists (`XX`).
    IfPresent,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether the value was written (conditions may prevent it).
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Set a TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `expected`, atomically.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Add (or re-score) `member` in the ordered set at `key`.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()>;

    /// Remove members with `min <= score <= max`. Returns how many were removed.
    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<usize>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Lowest score in the ordered set, if any.
    async fn zmin_score(&self, key: &str) -> Result<Option<i64>>;

    /// Drop every expired key. Returns how many were dropped. Stores that
    /// expire keys themselves keep the default.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
