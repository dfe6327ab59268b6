//! Direct SQLite database access for session records.
//!
//! [`Database`] is the synchronous connection wrapper; the coordinator reaches
//! it through the async [`DurableStore`](crate::store::DurableStore) trait.

pub mod migrations;

use crate::error::{Error, Result};
use crate::types::{AuditEntry, NewAuditEntry, SessionRecord, SessionStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SESSION_COLUMNS: &str = "id, owner_id, channel_id, status, kind, config, state,
     timeout_secs, created_at, updated_at, last_activity_at";

/// Database connection wrapper.
///
/// Thread-safe via internal Mutex. All database operations acquire the lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(Error::Database)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::prepare(conn)
    }

    /// Private in-memory database, fully migrated.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::Database)?;
        Self::prepare(conn)
    }

    fn prepare(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Check database connectivity
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute_batch("SELECT 1").map_err(Error::Database)
    }

    /// Applied schema versions.
    pub fn schema_versions(&self) -> Result<Vec<u32>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        migrations::applied_versions(&conn)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new session record
    pub fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let config = serde_json::to_string(&record.config)?;
        let state = record.state.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO sessions
             (id, owner_id, channel_id, status, kind, config, state,
              timeout_secs, created_at, updated_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.owner_id,
                record.channel_id,
                record.status.as_str(),
                record.kind.as_str(),
                config,
                state,
                record.timeout_secs,
                record.created_at,
                record.updated_at,
                record.last_activity_at,
            ],
        )?;

        Ok(())
    }

    /// Get session by ID
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE id = ?1",
            SESSION_COLUMNS
        ))?;

        Ok(stmt
            .query_row(params![session_id], Self::map_session)
            .optional()?)
    }

    /// All sessions for an owner, newest first
    pub fn list_sessions_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE owner_id = ?1 ORDER BY created_at DESC, id",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![owner_id], Self::map_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// All sessions in a given status, most recently active first
    pub fn list_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE status = ?1 ORDER BY last_activity_at DESC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![status.as_str()], Self::map_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Sessions whose inactivity exceeds their own timeout (or the default).
    pub fn list_expired_sessions(
        &self,
        now_ms: i64,
        default_timeout_secs: i64,
    ) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions
             WHERE status != 'destroyed'
               AND last_activity_at < ?1 - COALESCE(timeout_secs, ?2) * 1000
             ORDER BY last_activity_at ASC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![now_ms, default_timeout_secs], Self::map_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Count sessions that still count toward the owner's quota
    pub fn count_live_sessions(&self, owner_id: &str) -> Result<u32> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE owner_id = ?1 AND status != 'destroyed'",
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Update session status
    pub fn update_session_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let now = chrono::Utc::now().timestamp_millis();
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Update session last activity timestamp
    pub fn update_session_activity(&self, session_id: &str, at_ms: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let changed = conn.execute(
            "UPDATE sessions SET last_activity_at = MAX(last_activity_at, ?1), updated_at = ?1
             WHERE id = ?2",
            params![at_ms, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Store serialized session state and refresh activity
    pub fn save_session_state(&self, session_id: &str, state: &serde_json::Value) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let now = chrono::Utc::now().timestamp_millis();
        let changed = conn.execute(
            "UPDATE sessions SET state = ?1, last_activity_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status != 'destroyed'",
            params![serde_json::to_string(state)?, now, session_id],
        )?;
        Ok(changed > 0)
    }

    /// Move ownership from `from` to `to` and write the audit entry, atomically.
    ///
    /// Returns `false` (and changes nothing) when the session is not currently
    /// owned by `from`.
    pub fn transfer_ownership(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
        audit: &NewAuditEntry,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let now = chrono::Utc::now().timestamp_millis();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE sessions
             SET owner_id = ?1, status = 'active', updated_at = ?2, last_activity_at = ?2
             WHERE id = ?3 AND owner_id = ?4 AND status != 'destroyed'",
            params![to, now, session_id, from],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        Self::insert_audit(&tx, audit, now)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete a session record
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(changed > 0)
    }

    fn map_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        let status: String = row.get(3)?;
        let kind: String = row.get(4)?;
        let config: String = row.get(5)?;
        let state: Option<String> = row.get(6)?;

        Ok(SessionRecord {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            channel_id: row.get(2)?,
            status: status.parse().map_err(|e: String| conversion_error(3, e))?,
            kind: kind.parse().map_err(|e: String| conversion_error(4, e))?,
            config: serde_json::from_str(&config).map_err(|e| conversion_error(5, e))?,
            state: state
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| conversion_error(6, e))?,
            timeout_secs: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            last_activity_at: row.get(10)?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit Log Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create audit log entry
    pub fn create_audit_log(&self, entry: &NewAuditEntry) -> Result<String> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        Self::insert_audit(&conn, entry, chrono::Utc::now().timestamp_millis())
    }

    /// Audit entries for a session, oldest first
    pub fn list_audit_log(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, actor_id, action, details, created_at
             FROM session_audit_log WHERE session_id = ?1 ORDER BY created_at, rowid",
        )?;

        let entries = stmt
            .query_map(params![session_id], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    actor_id: row.get(2)?,
                    action: row.get(3)?,
                    details: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn insert_audit(conn: &Connection, entry: &NewAuditEntry, now: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO session_audit_log (id, session_id, actor_id, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, entry.session_id, entry.actor_id, entry.action, entry.details, now],
        )?;
        Ok(id)
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}
