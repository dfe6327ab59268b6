use super::events::{DestroyReason, SessionEvent};
use super::registry::{ManagedSession, OwnerGuards, SessionRegistry, SessionStats};
use crate::auth::SecurityAuthority;
use crate::backend::{SessionBackend, SessionSpec};
use crate::cache::CacheStore;
use crate::config::CoordinatorConfig;
use crate::error::{Error, SessionError, SessionResult};
use crate::kv::KvStore;
use crate::limiter::{RateLimitStatus, SlidingWindowLimiter};
use crate::lock::DistributedLock;
use crate::metrics::MetricsSink;
use crate::store::DurableStore;
use crate::types::{CreateOptions, NewAuditEntry, SessionRecord, SessionStatus, UserQuota};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

type CreateFuture = Shared<BoxFuture<'static, SessionResult<Arc<ManagedSession>>>>;

const EVENT_CAPACITY: usize = 256;

pub(crate) fn cache_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Owns every live session of this process and keeps the registry, cache and
/// durable store in agreement.
pub struct SessionManager {
    pub(super) config: CoordinatorConfig,
    pub(super) store: Arc<dyn DurableStore>,
    pub(super) cache: CacheStore,
    pub(super) kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    limiter: SlidingWindowLimiter,
    pub(super) backend: Arc<dyn SessionBackend>,
    authority: Arc<dyn SecurityAuthority>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) registry: SessionRegistry,
    pub(super) guards: OwnerGuards,
    inflight: Mutex<HashMap<String, CreateFuture>>,
    events: broadcast::Sender<SessionEvent>,
    pub(super) cleanup_task: Mutex<Option<AbortHandle>>,
}

impl SessionManager {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn DurableStore>,
        kv: Arc<dyn KvStore>,
        backend: Arc<dyn SessionBackend>,
        authority: Arc<dyn SecurityAuthority>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let cache = CacheStore::new(
            Arc::clone(&kv),
            Arc::clone(&metrics),
            config.cache.namespace.clone(),
            config.cache_ttl(),
        );
        let lock = DistributedLock::with_defaults(Arc::clone(&kv), &config.lock);
        let limiter = SlidingWindowLimiter::new(Arc::clone(&kv));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            config,
            store,
            cache,
            kv,
            lock,
            limiter,
            backend,
            authority,
            metrics,
            registry: SessionRegistry::new(),
            guards: OwnerGuards::new(),
            inflight: Mutex::new(HashMap::new()),
            events,
            cleanup_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Receive lifecycle events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(super) fn report_active(&self) {
        self.metrics
            .gauge("sessions.active", self.registry.len() as f64, &[]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Create / Reuse
    // ─────────────────────────────────────────────────────────────────────────

    /// The owner's live session, creating one if needed.
    ///
    /// Concurrent calls for the same owner share a single creation; every
    /// caller gets the same session or the same error.
    pub async fn get_or_create_session(
        self: &Arc<Self>,
        owner_id: &str,
        options: CreateOptions,
    ) -> SessionResult<Arc<ManagedSession>> {
        if let Some(session) = self.reuse_live(owner_id).await {
            return Ok(session);
        }

        let creation = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(owner_id) {
                Some(pending) => pending.clone(),
                None => {
                    // Runs as its own task so that it completes, and releases the
                    // owner guard, even when every waiter is cancelled.
                    let this = Arc::clone(self);
                    let owner = owner_id.to_string();
                    let task = tokio::spawn(async move {
                        let result = this.create_guarded(&owner, options).await;
                        this.inflight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&owner);
                        result
                    });
                    let creation = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(SessionError::backend(Error::Join(e)))
                            })
                        })
                        .boxed()
                        .shared();
                    inflight.insert(owner_id.to_string(), creation.clone());
                    creation
                }
            }
        };

        creation.await
    }

    /// Touch and return the owner's entry if its handle is alive.
    async fn reuse_live(&self, owner_id: &str) -> Option<Arc<ManagedSession>> {
        let session = self.registry.get_by_owner(owner_id)?;
        if !session.is_alive() {
            return None;
        }
        session.update(|r| r.touch());
        if let Err(e) = session.handle().touch().await {
            debug!(owner_id, session_id = %session.id(), error = %e, "Backend touch failed");
        }
        self.metrics.increment("sessions.reused", 1, &[]);
        Some(session)
    }

    async fn create_guarded(
        &self,
        owner_id: &str,
        options: CreateOptions,
    ) -> SessionResult<Arc<ManagedSession>> {
        let _guard = self.guards.lock(owner_id).await;

        // Re-check under the guard: a clear or handoff may have raced us here.
        if let Some(session) = self.reuse_live(owner_id).await {
            return Ok(session);
        }
        if let Some(dead) = self.registry.get_by_owner(owner_id) {
            self.evict_dead(&dead).await;
        }

        let result = self.create_checked(owner_id, options).await;
        if let Err(e) = &result {
            self.metrics
                .increment("sessions.errors", 1, &[("reason", e.kind())]);
            warn!(owner_id, error = %e, "Session creation failed");
        }
        result
    }

    async fn create_checked(
        &self,
        owner_id: &str,
        options: CreateOptions,
    ) -> SessionResult<Arc<ManagedSession>> {
        let quota = self.user_quota(owner_id).await?;
        if quota.is_exhausted() {
            return Err(SessionError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                active: quota.active,
                max: quota.max,
            });
        }

        self.check_rate_limit(owner_id).await?;

        if !self.config.lock.guard_create {
            return self.create_session(owner_id, &options).await;
        }

        let lock_key = format!("lock:create:{}", owner_id);
        let token = match self.lock.lock(&lock_key).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => return Err(SessionError::LockUnavailable(lock_key)),
            Err(e) => {
                warn!(owner_id, key = %lock_key, error = %e, "Lock store unavailable, creating without lock");
                self.metrics.increment("cache.errors", 1, &[("op", "lock")]);
                None
            }
        };

        let result = self.create_session(owner_id, &options).await;

        if let Some(token) = token {
            if let Err(e) = self.lock.release(&lock_key, &token).await {
                warn!(owner_id, key = %lock_key, error = %e, "Failed to release create lock");
                self.metrics.increment("cache.errors", 1, &[("op", "unlock")]);
            }
        }
        result
    }

    async fn create_session(
        &self,
        owner_id: &str,
        options: &CreateOptions,
    ) -> SessionResult<Arc<ManagedSession>> {
        let started = Instant::now();
        let mut record = SessionRecord::new(owner_id, options);

        let handle = self
            .backend
            .create(&SessionSpec::from(&record))
            .await
            .map_err(SessionError::backend)?;

        let persisted = match record.transition(SessionStatus::Active) {
            Ok(()) => self.store.insert(&record).await.map_err(SessionError::store),
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            error!(owner_id, session_id = %record.id, error = %e, "Failed to persist new session");
            if let Err(destroy_err) = handle.destroy().await {
                warn!(session_id = %record.id, error = %destroy_err, "Failed to destroy orphaned handle");
            }
            return Err(e);
        }

        self.cache.set(&cache_key(&record.id), &record, None).await;

        let session_id = record.id.clone();
        let session = Arc::new(ManagedSession::new(record, handle));
        self.registry.insert(Arc::clone(&session));

        self.emit(SessionEvent::Created {
            owner_id: owner_id.to_string(),
            session_id: session_id.clone(),
        });
        self.metrics.increment("sessions.created", 1, &[]);
        self.report_active();
        self.metrics.histogram(
            "sessions.create_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            &[],
        );

        info!(owner_id, session_id = %session_id, "Session created");
        Ok(session)
    }

    /// Drop an entry whose handle died; its durable record is marked destroyed.
    pub(super) async fn evict_dead(&self, session: &Arc<ManagedSession>) {
        let session_id = session.id().to_string();
        let owner_id = session.owner_id();
        if self.registry.remove_by_id(&session_id).is_none() {
            return;
        }
        session.update(|r| r.transition(SessionStatus::Destroyed)).ok();

        if let Err(e) = self
            .store
            .set_status(&session_id, SessionStatus::Destroyed)
            .await
        {
            warn!(owner_id = %owner_id, session_id = %session_id, error = %e, "Failed to mark dead session destroyed");
        }
        if let Err(e) = session.handle().destroy().await {
            debug!(session_id = %session_id, error = %e, "Destroy of dead handle failed");
        }
        self.cache.delete(&cache_key(&session_id)).await;

        info!(owner_id = %owner_id, session_id = %session_id, "Evicted dead session");
        self.emit(SessionEvent::Destroyed {
            owner_id,
            session_id,
            reason: DestroyReason::Dead,
        });
        self.report_active();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Registry, then cache, then durable store. A store hit refills the cache.
    pub async fn get_session(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        if let Some(session) = self.registry.get_by_id(session_id) {
            return Ok(Some(session.record()));
        }

        let key = cache_key(session_id);
        if let Some(record) = self.cache.get::<SessionRecord>(&key).await {
            return Ok(Some(record));
        }

        let record = self.store.get(session_id).await.map_err(|e| {
            error!(session_id, error = %e, "Failed to load session");
            SessionError::store(e)
        })?;
        if let Some(record) = &record {
            self.cache.set(&key, record, None).await;
        }
        Ok(record)
    }

    /// Every durable record for the owner, newest first.
    pub async fn get_user_sessions(&self, owner_id: &str) -> SessionResult<Vec<SessionRecord>> {
        self.store.list_by_owner(owner_id).await.map_err(|e| {
            error!(owner_id, error = %e, "Failed to list sessions");
            SessionError::store(e)
        })
    }

    pub async fn user_quota(&self, owner_id: &str) -> SessionResult<UserQuota> {
        let active = self.store.count_live(owner_id).await.map_err(|e| {
            error!(owner_id, error = %e, "Failed to count sessions");
            SessionError::store(e)
        })?;
        Ok(UserQuota {
            owner_id: owner_id.to_string(),
            active,
            max: self.config.max_sessions_per_user,
        })
    }

    /// Liveness summary of the registry.
    pub fn get_stats(&self) -> SessionStats {
        SessionStats::collect(&self.registry.snapshot())
    }

    /// Sliding-window check on `ratelimit:create:{owner}`.
    ///
    /// An unreachable limiter store admits the request.
    pub async fn check_rate_limit(&self, owner_id: &str) -> SessionResult<RateLimitStatus> {
        let key = format!("ratelimit:create:{}", owner_id);
        let limit = self.config.rate_limit.limit;
        let window_secs = self.config.rate_limit.window_secs;

        match self.limiter.check(&key, limit, window_secs).await {
            Ok(status) if status.allowed => Ok(status),
            Ok(status) => {
                debug!(owner_id, reset_at = status.reset_at, "Rate limited");
                Err(SessionError::RateLimited {
                    owner_id: owner_id.to_string(),
                    reset_at: status.reset_at,
                })
            }
            Err(e) => {
                warn!(owner_id, error = %e, "Rate limiter unavailable, allowing request");
                self.metrics.increment("cache.errors", 1, &[("op", "ratelimit")]);
                let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                Ok(RateLimitStatus {
                    allowed: true,
                    remaining: limit,
                    reset_at: chrono::Utc::now()
                        .timestamp_millis()
                        .saturating_add(window_ms),
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Destroy
    // ─────────────────────────────────────────────────────────────────────────

    /// Destroy the owner's session. `Ok(false)` when there is nothing to clear.
    pub async fn clear_session(&self, owner_id: &str) -> SessionResult<bool> {
        let _guard = self.guards.lock(owner_id).await;
        let Some(session) = self.registry.get_by_owner(owner_id) else {
            return Ok(false);
        };
        let session_id = session.id().to_string();

        self.store.delete(&session_id).await.map_err(|e| {
            error!(owner_id, session_id = %session_id, error = %e, "Failed to delete session record");
            SessionError::store(e)
        })?;

        session.update(|r| r.transition(SessionStatus::Destroyed)).ok();
        if let Err(e) = session.handle().destroy().await {
            warn!(owner_id, session_id = %session_id, error = %e, "Backend destroy failed");
        }
        self.registry.remove_by_id(&session_id);
        self.cache.delete(&cache_key(&session_id)).await;

        info!(owner_id, session_id = %session_id, "Session cleared");
        self.emit(SessionEvent::Destroyed {
            owner_id: owner_id.to_string(),
            session_id,
            reason: DestroyReason::Cleared,
        });
        self.report_active();
        Ok(true)
    }

    /// Destroy every registered handle, keeping durable records for restore.
    pub async fn destroy_all_sessions(&self) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();

        for session in sessions {
            let owner_id = session.owner_id();
            let session_id = session.id().to_string();
            if let Err(e) = session.handle().destroy().await {
                warn!(owner_id = %owner_id, session_id = %session_id, error = %e, "Backend destroy failed during shutdown");
            }
            self.emit(SessionEvent::Destroyed {
                owner_id,
                session_id,
                reason: DestroyReason::Shutdown,
            });
        }

        self.report_active();
        info!(count, "Destroyed all sessions");
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handoff
    // ─────────────────────────────────────────────────────────────────────────

    /// Transfer `session_id` from `from` to `to`.
    pub async fn handoff_session(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
    ) -> SessionResult<bool> {
        if from == to {
            return Err(SessionError::InvalidHandoff(
                "source and target owner are the same".to_string(),
            ));
        }

        let _guards = self.guards.lock_pair(from, to).await;

        let session = self
            .registry
            .get_by_owner(from)
            .filter(|s| s.id() == session_id)
            .ok_or_else(|| {
                SessionError::not_found(format!("session {} owned by {}", session_id, from))
            })?;

        if let Some(existing) = self.registry.get_by_owner(to) {
            if existing.is_alive() {
                return Err(SessionError::TargetOccupied {
                    owner_id: to.to_string(),
                });
            }
            self.evict_dead(&existing).await;
        }

        let allowed = match self.authority.can_handoff_session(from, to, session_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(from, to, session_id, error = %e, "Security authority failed, denying handoff");
                false
            }
        };
        if !allowed {
            return Err(self.deny_handoff(session_id, from, to).await);
        }

        session.update(|r| {
            if r.status == SessionStatus::Idle {
                r.transition(SessionStatus::Active)?;
            }
            r.transition(SessionStatus::HandoffPending)
        })?;

        let audit = NewAuditEntry {
            session_id: Some(session_id.to_string()),
            actor_id: from.to_string(),
            action: "handoff".to_string(),
            details: Some(serde_json::json!({ "from": from, "to": to }).to_string()),
        };
        let transferred = self
            .store
            .transfer_ownership(session_id, from, to, &audit)
            .await;

        let failure = match transferred {
            Ok(true) => None,
            Ok(false) => Some(SessionError::not_found(format!(
                "durable record of {} owned by {}",
                session_id, from
            ))),
            Err(e) => {
                error!(from, to, session_id, error = %e, "Ownership transfer failed");
                Some(SessionError::store(e))
            }
        };
        if let Some(err) = failure {
            session.update(|r| r.transition(SessionStatus::Active)).ok();
            return Err(err);
        }

        if self.registry.rekey(session_id, from, to).is_none() {
            error!(from, to, session_id, "Registry re-key failed after ownership transfer");
            self.revert_transfer(session_id, from, to).await;
            session.update(|r| r.transition(SessionStatus::Active)).ok();
            return Err(SessionError::TargetOccupied {
                owner_id: to.to_string(),
            });
        }
        session.update(|r| {
            r.touch();
            r.transition(SessionStatus::Active)
        })?;
        self.cache
            .set(&cache_key(session_id), &session.record(), None)
            .await;

        info!(from, to, session_id, "Session handed off");
        self.emit(SessionEvent::HandedOff {
            session_id: session_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.metrics.increment("handoff.completed", 1, &[]);
        Ok(true)
    }

    /// Hand the durable record back to `from`. Best-effort.
    async fn revert_transfer(&self, session_id: &str, from: &str, to: &str) {
        let audit = NewAuditEntry {
            session_id: Some(session_id.to_string()),
            actor_id: from.to_string(),
            action: "handoff_reverted".to_string(),
            details: Some(serde_json::json!({ "from": from, "to": to }).to_string()),
        };
        match self.store.transfer_ownership(session_id, to, from, &audit).await {
            Ok(true) => {}
            Ok(false) => warn!(session_id, from, to, "Durable record moved before revert"),
            Err(e) => error!(session_id, from, to, error = %e, "Failed to revert ownership transfer"),
        }
    }

    async fn deny_handoff(&self, session_id: &str, from: &str, to: &str) -> SessionError {
        warn!(
            target: "handoff::security",
            from, to, session_id,
            "Unauthorized handoff attempt"
        );
        self.metrics.increment("handoff.denied", 1, &[]);

        let audit = NewAuditEntry {
            session_id: Some(session_id.to_string()),
            actor_id: from.to_string(),
            action: "handoff_denied".to_string(),
            details: Some(serde_json::json!({ "to": to }).to_string()),
        };
        if let Err(e) = self.store.append_audit(&audit).await {
            warn!(session_id, error = %e, "Failed to write denial audit entry");
        }

        SessionError::Unauthorized {
            from: from.to_string(),
            to: to.to_string(),
            session_id: session_id.to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist `data` as the session's state, then refresh registry and cache.
    pub async fn save_session_state(
        &self,
        session_id: &str,
        data: serde_json::Value,
    ) -> SessionResult<()> {
        let saved = self
            .store
            .save_state(session_id, &data)
            .await
            .map_err(|e| {
                error!(session_id, error = %e, "Failed to save session state");
                SessionError::store(e)
            })?;
        if !saved {
            return Err(SessionError::not_found(session_id));
        }

        let record = match self.registry.get_by_id(session_id) {
            Some(session) => {
                session.update(|r| {
                    r.state = Some(data);
                    r.touch();
                });
                Some(session.record())
            }
            None => match self.store.get(session_id).await {
                Ok(record) => record,
                Err(e) => {
                    debug!(session_id, error = %e, "Skipping cache refresh after state save");
                    None
                }
            },
        };
        if let Some(record) = record {
            self.cache.set(&cache_key(session_id), &record, None).await;
        }
        Ok(())
    }

    /// Ask the backend for a snapshot of a registered session and persist it.
    pub async fn capture_session_state(&self, session_id: &str) -> SessionResult<serde_json::Value> {
        let session = self
            .registry
            .get_by_id(session_id)
            .ok_or_else(|| SessionError::not_found(session_id))?;
        let state = session
            .handle()
            .serialize_state()
            .await
            .map_err(SessionError::backend)?;
        self.save_session_state(session_id, state.clone()).await?;
        Ok(state)
    }
}
