//! Test doubles shared by unit tests.

use crate::auth::{SecurityAuthority, StaticAuthority};
use crate::backend::{SessionBackend, SessionHandle, SessionSpec};
use crate::config::CoordinatorConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::kv::{KvStore, MemoryKv, SetCondition};
use crate::metrics::MemoryMetrics;
use crate::session::SessionManager;
use crate::store::{DurableStore, SqliteStore};
use crate::types::{AuditEntry, NewAuditEntry, SessionRecord, SessionStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FakeHandle {
    session_id: String,
    alive: AtomicBool,
    pub destroyed: AtomicUsize,
    pub touched: AtomicUsize,
    pub refreshed: AtomicUsize,
}

impl FakeHandle {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            alive: AtomicBool::new(true),
            destroyed: AtomicUsize::new(0),
            touched: AtomicUsize::new(0),
            refreshed: AtomicUsize::new(0),
        }
    }

    /// Simulate the backend process dying.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionHandle for FakeHandle {
    async fn destroy(&self) -> Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn touch(&self) -> Result<()> {
        self.touched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn serialize_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "session": self.session_id, "lines": ["$ echo hi", "hi"] }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn refresh_liveness(&self) -> bool {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        self.is_alive()
    }
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub created: AtomicUsize,
    pub restored: AtomicUsize,
    pub create_delay: Duration,
    pub fail_restore: Mutex<HashSet<String>>,
    handles: Mutex<HashMap<String, Arc<FakeHandle>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(create_delay: Duration) -> Self {
        Self {
            create_delay,
            ..Self::default()
        }
    }

    pub fn handle(&self, session_id: &str) -> Option<Arc<FakeHandle>> {
        self.handles.lock().unwrap().get(session_id).cloned()
    }

    fn register(&self, session_id: &str) -> Arc<FakeHandle> {
        let handle = Arc::new(FakeHandle::new(session_id));
        self.handles
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Arc::clone(&handle));
        handle
    }
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn SessionHandle>> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.register(&spec.session_id))
    }

    async fn restore(&self, record: &SessionRecord) -> Result<Arc<dyn SessionHandle>> {
        if self.fail_restore.lock().unwrap().contains(&record.id) {
            return Err(Error::Tmux(format!("cannot restore {}", record.id)));
        }
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(self.register(&record.id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unreachable stores
// ─────────────────────────────────────────────────────────────────────────────

/// A key/value store whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingKv;

fn unreachable_kv<T>() -> Result<T> {
    Err(Error::kv("connection refused"))
}

#[async_trait]
impl KvStore for FailingKv {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        unreachable_kv()
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
        _condition: SetCondition,
    ) -> Result<bool> {
        unreachable_kv()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        unreachable_kv()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        unreachable_kv()
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> Result<bool> {
        unreachable_kv()
    }

    async fn zadd(&self, _key: &str, _score: i64, _member: &str) -> Result<()> {
        unreachable_kv()
    }

    async fn zremrangebyscore(&self, _key: &str, _min: i64, _max: i64) -> Result<usize> {
        unreachable_kv()
    }

    async fn zcard(&self, _key: &str) -> Result<usize> {
        unreachable_kv()
    }

    async fn zmin_score(&self, _key: &str) -> Result<Option<i64>> {
        unreachable_kv()
    }
}

/// A durable store whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(Error::Other("database is unavailable".into()))
}

#[async_trait]
impl DurableStore for FailingStore {
    async fn insert(&self, _record: &SessionRecord) -> Result<()> {
        unavailable()
    }

    async fn get(&self, _session_id: &str) -> Result<Option<SessionRecord>> {
        unavailable()
    }

    async fn list_by_owner(&self, _owner_id: &str) -> Result<Vec<SessionRecord>> {
        unavailable()
    }

    async fn list_by_status(&self, _status: SessionStatus) -> Result<Vec<SessionRecord>> {
        unavailable()
    }

    async fn list_expired(&self, _now_ms: i64, _default: i64) -> Result<Vec<SessionRecord>> {
        unavailable()
    }

    async fn count_live(&self, _owner_id: &str) -> Result<u32> {
        unavailable()
    }

    async fn set_status(&self, _session_id: &str, _status: SessionStatus) -> Result<bool> {
        unavailable()
    }

    async fn record_activity(&self, _session_id: &str, _at_ms: i64) -> Result<bool> {
        unavailable()
    }

    async fn save_state(&self, _session_id: &str, _state: &serde_json::Value) -> Result<bool> {
        unavailable()
    }

    async fn transfer_ownership(
        &self,
        _session_id: &str,
        _from: &str,
        _to: &str,
        _audit: &NewAuditEntry,
    ) -> Result<bool> {
        unavailable()
    }

    async fn delete(&self, _session_id: &str) -> Result<bool> {
        unavailable()
    }

    async fn append_audit(&self, _entry: &NewAuditEntry) -> Result<String> {
        unavailable()
    }

    async fn audit_log(&self, _session_id: &str) -> Result<Vec<AuditEntry>> {
        unavailable()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// A manager over in-memory SQLite, plus handles on every collaborator.
pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub store: SqliteStore,
    pub backend: Arc<FakeBackend>,
    pub metrics: Arc<MemoryMetrics>,
}

pub struct HarnessBuilder {
    config: CoordinatorConfig,
    kv: Arc<dyn KvStore>,
    backend: FakeBackend,
    authority: Arc<dyn SecurityAuthority>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            kv: Arc::new(MemoryKv::new()),
            backend: FakeBackend::new(),
            authority: Arc::new(StaticAuthority::allow_all()),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut CoordinatorConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self
    }

    pub fn backend(mut self, backend: FakeBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn authority(mut self, authority: impl SecurityAuthority + 'static) -> Self {
        self.authority = Arc::new(authority);
        self
    }

    pub fn build(self) -> Harness {
        let store = SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let backend = Arc::new(self.backend);
        let metrics = Arc::new(MemoryMetrics::new());
        let manager = SessionManager::new(
            self.config,
            Arc::new(store.clone()),
            self.kv,
            backend.clone(),
            self.authority,
            metrics.clone(),
        );
        Harness {
            manager,
            store,
            backend,
            metrics,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}
