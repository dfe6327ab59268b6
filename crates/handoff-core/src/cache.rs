//! Cache-aside layer over a [`KvStore`].
//!
//! Values are JSON-encoded under `{namespace}:{key}`. The cache is an
//! accelerator only: every failure is logged, counted as `cache.errors{op}`
//! and reported as a miss (or `false`), never as an error.

use crate::kv::{KvStore, SetCondition};
use crate::metrics::MetricsSink;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct CacheStore {
    kv: Arc<dyn KvStore>,
    metrics: Arc<dyn MetricsSink>,
    namespace: String,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        metrics: Arc<dyn MetricsSink>,
        namespace: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            kv,
            metrics,
            namespace: namespace.into(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn failed(&self, op: &'static str, key: &str, err: impl Display) {
        warn!(op, key, error = %err, "Cache operation failed");
        self.metrics.increment("cache.errors", 1, &[("op", op)]);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(&self.key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.failed("get", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.failed("decode", key, e);
                None
            }
        }
    }

    /// Write with `ttl`, or the default TTL when `None`.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        self.write("set", key, value, ttl, SetCondition::Always).await
    }

    pub async fn set_if_absent<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.write("set_if_absent", key, value, ttl, SetCondition::IfAbsent)
            .await
    }

    pub async fn set_if_present<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.write("set_if_present", key, value, ttl, SetCondition::IfPresent)
            .await
    }

    async fn write<T: Serialize>(
        &self,
        op: &'static str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.failed("encode", key, e);
                return false;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        match self
            .kv
            .set(&self.key(key), &encoded, Some(ttl), condition)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                self.failed(op, key, e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.kv.delete(&self.key(key)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.failed("delete", key, e);
                false
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.kv.expire(&self.key(key), ttl).await {
            Ok(found) => found,
            Err(e) => {
                self.failed("expire", key, e);
                false
            }
        }
    }
}
