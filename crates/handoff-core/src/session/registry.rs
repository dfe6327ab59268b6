//! Process-wide registry of live sessions.
//!
//! All maps here sit behind `std::sync::Mutex` and are touched only in short
//! synchronous sections; nothing is held across an `.await`.

use crate::backend::SessionHandle;
use crate::types::{SessionRecord, SessionStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Managed Session
// ─────────────────────────────────────────────────────────────────────────────

/// A registered session: its backend handle plus the in-memory record.
pub struct ManagedSession {
    id: String,
    handle: Arc<dyn SessionHandle>,
    record: RwLock<SessionRecord>,
}

impl ManagedSession {
    pub fn new(record: SessionRecord, handle: Arc<dyn SessionHandle>) -> Self {
        Self {
            id: record.id.clone(),
            handle,
            record: RwLock::new(record),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> String {
        self.read(|r| r.owner_id.clone())
    }

    pub fn status(&self) -> SessionStatus {
        self.read(|r| r.status)
    }

    pub fn last_activity_at(&self) -> i64 {
        self.read(|r| r.last_activity_at)
    }

    /// Snapshot of the current record.
    pub fn record(&self) -> SessionRecord {
        self.read(SessionRecord::clone)
    }

    pub fn handle(&self) -> &Arc<dyn SessionHandle> {
        &self.handle
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    fn read<R>(&self, f: impl FnOnce(&SessionRecord) -> R) -> R {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        f(&*record)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *record)
    }
}

impl fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSession")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Entries {
    by_owner: HashMap<String, Arc<ManagedSession>>,
    owner_by_id: HashMap<String, String>,
}

/// At most one session per owner, with a secondary index by session id.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<Entries>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_owner(&self, owner_id: &str) -> Option<Arc<ManagedSession>> {
        lock(&self.entries).by_owner.get(owner_id).cloned()
    }

    pub fn get_by_id(&self, session_id: &str) -> Option<Arc<ManagedSession>> {
        let entries = lock(&self.entries);
        let owner = entries.owner_by_id.get(session_id)?;
        entries.by_owner.get(owner).cloned()
    }

    /// Register `session` under its owner, returning any entry it displaced.
    pub fn insert(&self, session: Arc<ManagedSession>) -> Option<Arc<ManagedSession>> {
        let owner = session.owner_id();
        let id = session.id().to_string();
        let mut entries = lock(&self.entries);
        entries.owner_by_id.insert(id.clone(), owner.clone());
        let displaced = entries.by_owner.insert(owner, session);
        if let Some(old) = &displaced {
            if old.id() != id {
                entries.owner_by_id.remove(old.id());
            }
        }
        displaced
    }

    /// Remove the entry for `session_id`, wherever it is registered.
    pub fn remove_by_id(&self, session_id: &str) -> Option<Arc<ManagedSession>> {
        let mut entries = lock(&self.entries);
        let owner = entries.owner_by_id.remove(session_id)?;
        entries.by_owner.remove(&owner)
    }

    /// Move `session_id` from `from` to `to` and rewrite the record's owner, in
    /// one critical section. Returns `None` if `from` does not hold it or `to`
    /// already holds something.
    pub fn rekey(&self, session_id: &str, from: &str, to: &str) -> Option<Arc<ManagedSession>> {
        let mut entries = lock(&self.entries);
        if entries.by_owner.contains_key(to)
            || entries.by_owner.get(from).map(|s| s.id()) != Some(session_id)
        {
            return None;
        }
        let session = entries.by_owner.remove(from)?;
        session.update(|r| r.owner_id = to.to_string());
        entries
            .owner_by_id
            .insert(session_id.to_string(), to.to_string());
        entries.by_owner.insert(to.to_string(), Arc::clone(&session));
        Some(session)
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<Arc<ManagedSession>> {
        let mut entries = lock(&self.entries);
        entries.owner_by_id.clear();
        entries.by_owner.drain().map(|(_, s)| s).collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<ManagedSession>> {
        lock(&self.entries).by_owner.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-owner Guards
// ─────────────────────────────────────────────────────────────────────────────

/// Async mutex per owner serializing create, clear and handoff.
#[derive(Default)]
pub struct OwnerGuards {
    guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OwnerGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self, owner_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.guards).entry(owner_id.to_string()).or_default())
    }

    pub async fn lock(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        self.guard(owner_id).lock_owned().await
    }

    /// Both owners' guards, taken in lexical order. `a` and `b` must differ.
    pub async fn lock_pair(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, second)
    }

    /// Drop guards nobody is holding or waiting on.
    pub fn prune(&self) -> usize {
        let mut guards = lock(&self.guards);
        let before = guards.len();
        guards.retain(|_, guard| Arc::strong_count(guard) > 1);
        before - guards.len()
    }
}

/// Registry liveness summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

impl SessionStats {
    pub(crate) fn collect(sessions: &[Arc<ManagedSession>]) -> Self {
        let active = sessions.iter().filter(|s| s.is_alive()).count();
        Self {
            total: sessions.len(),
            active,
            inactive: sessions.len() - active,
        }
    }
}
