//! In-process [`KvStore`] implementation.
//!
//! Suitable for single-node deployments and tests. Expiry uses the tokio clock,
//! so `tokio::time::pause` / `advance` drive TTLs deterministically.
//!
//! Expired keys are dropped when touched, by a full sweep every
//! [`PURGE_EVERY_OPS`] operations, and by [`KvStore::purge_expired`].

use super::{KvStore, SetCondition};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Operations between two automatic expiry sweeps.
pub const PURGE_EVERY_OPS: u64 = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet {
        by_score: BTreeSet<(i64, String)>,
        scores: HashMap<String, i64>,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Mutex-guarded map with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    ops: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys physically held, expired or not.
    pub fn stored_entries(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::kv("memory store lock poisoned"))
    }

    /// Run `f` against the live map after dropping `key` if it has expired.
    fn with_key<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> Result<T> {
        let mut entries = self.lock_entries()?;
        let now = Instant::now();
        if self.ops.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY_OPS == PURGE_EVERY_OPS - 1 {
            purge(&mut entries, now);
        } else if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(f(&mut entries))
    }
}

fn purge(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

fn wrong_type(key: &str) -> Error {
    Error::kv(format!("WRONGTYPE operation against key {}", key))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool> {
        self.with_key(key, |entries| {
            let exists = entries.contains_key(key);
            let allowed = match condition {
                SetCondition::Always => true,
                SetCondition::IfAbsent => !exists,
                SetCondition::IfPresent => exists,
            };
            if allowed {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str(value.to_string()),
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
            }
            allowed
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_key(key, |entries| entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.with_key(key, |entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.with_key(key, |entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(current), .. }) if current == expected
            );
            if matches {
                entries.remove(key);
            }
            matches
        })
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        self.with_key(key, |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::ZSet {
                    by_score: BTreeSet::new(),
                    scores: HashMap::new(),
                },
                expires_at: None,
            });
            match &mut entry.value {
                Value::ZSet { by_score, scores } => {
                    if let Some(old) = scores.insert(member.to_string(), score) {
                        by_score.remove(&(old, member.to_string()));
                    }
                    by_score.insert((score, member.to_string()));
                    Ok(())
                }
                Value::Str(_) => Err(wrong_type(key)),
            }
        })?
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<usize> {
        self.with_key(key, |entries| match entries.get_mut(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::ZSet { by_score, scores },
                ..
            }) => {
                let doomed: Vec<(i64, String)> = by_score
                    .iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .cloned()
                    .collect();
                for item in &doomed {
                    by_score.remove(item);
                    scores.remove(&item.1);
                }
                if by_score.is_empty() {
                    entries.remove(key);
                }
                Ok(doomed.len())
            }
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::ZSet { by_score, .. },
                ..
            }) => Ok(by_score.len()),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<i64>> {
        self.with_key(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet { by_score, .. },
                ..
            }) => Ok(by_score.first().map(|(score, _)| *score)),
            Some(_) => Err(wrong_type(key)),
        })?
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.lock_entries()?;
        Ok(purge(&mut entries, Instant::now()))
    }
}
