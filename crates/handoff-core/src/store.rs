//! Durable store seam used by the coordinator.
//!
//! [`SqliteStore`] runs every [`Database`] call on the blocking pool so the
//! coordinator's tasks never block on SQLite.

use crate::db::Database;
use crate::error::Result;
use crate::types::{AuditEntry, NewAuditEntry, SessionRecord, SessionStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Relational persistence for session records; the authority of record.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn insert(&self, record: &SessionRecord) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Every record for the owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>>;

    async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<SessionRecord>>;

    /// Records idle past their timeout (or `default_timeout_secs`) at `now_ms`.
    async fn list_expired(&self, now_ms: i64, default_timeout_secs: i64)
    -> Result<Vec<SessionRecord>>;

    /// Records counting toward the owner's quota.
    async fn count_live(&self, owner_id: &str) -> Result<u32>;

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<bool>;

    async fn record_activity(&self, session_id: &str, at_ms: i64) -> Result<bool>;

    async fn save_state(&self, session_id: &str, state: &serde_json::Value) -> Result<bool>;

    /// Atomic owner change guarded by the current owner, plus its audit entry.
    async fn transfer_ownership(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
        audit: &NewAuditEntry,
    ) -> Result<bool>;

    async fn delete(&self, session_id: &str) -> Result<bool>;

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<String>;

    async fn audit_log(&self, session_id: &str) -> Result<Vec<AuditEntry>>;
}

/// [`DurableStore`] backed by the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |db| db.insert_session(&record)).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let id = session_id.to_string();
        self.run(move |db| db.get_session(&id)).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>> {
        let owner = owner_id.to_string();
        self.run(move |db| db.list_sessions_by_owner(&owner)).await
    }

    async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<SessionRecord>> {
        self.run(move |db| db.list_sessions_by_status(status)).await
    }

    async fn list_expired(
        &self,
        now_ms: i64,
        default_timeout_secs: i64,
    ) -> Result<Vec<SessionRecord>> {
        self.run(move |db| db.list_expired_sessions(now_ms, default_timeout_secs))
            .await
    }

    async fn count_live(&self, owner_id: &str) -> Result<u32> {
        let owner = owner_id.to_string();
        self.run(move |db| db.count_live_sessions(&owner)).await
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let id = session_id.to_string();
        self.run(move |db| db.update_session_status(&id, status)).await
    }

    async fn record_activity(&self, session_id: &str, at_ms: i64) -> Result<bool> {
        let id = session_id.to_string();
        self.run(move |db| db.update_session_activity(&id, at_ms)).await
    }

    async fn save_state(&self, session_id: &str, state: &serde_json::Value) -> Result<bool> {
        let id = session_id.to_string();
        let state = state.clone();
        self.run(move |db| db.save_session_state(&id, &state)).await
    }

    async fn transfer_ownership(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
        audit: &NewAuditEntry,
    ) -> Result<bool> {
        let (id, from, to, audit) = (
            session_id.to_string(),
            from.to_string(),
            to.to_string(),
            audit.clone(),
        );
        self.run(move |db| db.transfer_ownership(&id, &from, &to, &audit))
            .await
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let id = session_id.to_string();
        self.run(move |db| db.delete_session(&id)).await
    }

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<String> {
        let entry = entry.clone();
        self.run(move |db| db.create_audit_log(&entry)).await
    }

    async fn audit_log(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        let id = session_id.to_string();
        self.run(move |db| db.list_audit_log(&id)).await
    }
}
