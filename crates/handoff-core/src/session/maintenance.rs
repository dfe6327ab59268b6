//! Restore after restart, the inactivity sweep, and the manager's lifecycle.

use super::events::{DestroyReason, SessionEvent};
use super::manager::{SessionManager, cache_key};
use super::registry::ManagedSession;
use crate::types::{SessionRecord, SessionStatus};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

impl SessionManager {
    /// Restore active sessions, then start the periodic cleanup sweep.
    pub async fn init(self: &Arc<Self>) -> usize {
        let restored = self.restore_sessions().await;
        self.start_cleanup_loop();
        restored
    }

    /// Stop the sweep and destroy every registered handle.
    pub async fn shutdown(&self) -> usize {
        if let Some(task) = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Cleanup loop stopped");
        }
        self.destroy_all_sessions().await
    }

    fn start_cleanup_loop(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        // `interval` panics on a zero period.
        let period = self.config.cleanup_interval().max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let cleaned = manager.cleanup_inactive_sessions().await;
                manager.guards.prune();
                debug!(cleaned, "Cleanup sweep finished");
            }
        });

        let previous = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(interval_secs = period.as_secs(), "Cleanup loop started");
    }

    /// Re-register every `active` durable record. Idempotent.
    pub async fn restore_sessions(&self) -> usize {
        let records = match self.store.list_by_status(SessionStatus::Active).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to load sessions for restore");
                self.metrics.increment("restore.errors", 1, &[]);
                return 0;
            }
        };

        let mut latest: HashMap<String, SessionRecord> = HashMap::new();
        for record in records {
            match latest.entry(record.owner_id.clone()) {
                Entry::Occupied(mut slot) => {
                    if record.last_activity_at > slot.get().last_activity_at {
                        slot.insert(record);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }

        let mut restored = 0;
        for (owner_id, record) in latest {
            let _guard = self.guards.lock(&owner_id).await;
            if self.registry.get_by_owner(&owner_id).is_some() {
                continue;
            }

            match self.backend.restore(&record).await {
                Ok(handle) => {
                    self.cache.set(&cache_key(&record.id), &record, None).await;
                    debug!(owner_id = %owner_id, session_id = %record.id, "Session restored");
                    self.registry
                        .insert(Arc::new(ManagedSession::new(record, handle)));
                    restored += 1;
                }
                Err(e) => {
                    warn!(owner_id = %owner_id, session_id = %record.id, error = %e, "Failed to restore session");
                    self.metrics.increment("restore.errors", 1, &[]);
                }
            }
        }

        self.metrics.gauge("sessions.restored", restored as f64, &[]);
        self.report_active();
        info!(restored, "Session restore finished");
        restored
    }

    /// Evict dead handles, then delete sessions idle past their timeout.
    pub async fn cleanup_inactive_sessions(&self) -> usize {
        let mut cleaned = 0;

        for session in self.registry.snapshot() {
            if !session.handle().refresh_liveness().await {
                self.evict_dead(&session).await;
                cleaned += 1;
            }
        }

        match self.kv.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired cache keys"),
            Err(e) => {
                warn!(error = %e, "Failed to purge expired cache keys");
                self.metrics.increment("cache.errors", 1, &[("op", "purge")]);
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let default_timeout = i64::try_from(self.config.default_timeout_secs).unwrap_or(i64::MAX);
        let candidates = match self.store.list_expired(now, default_timeout).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to list expired sessions");
                return cleaned;
            }
        };

        for record in candidates {
            let _guard = self.guards.lock(&record.owner_id).await;

            // In-memory activity is newer than the store's; trust it.
            if let Some(session) = self.registry.get_by_id(&record.id) {
                let current = session.record();
                if !current.is_expired(now, default_timeout) {
                    if let Err(e) = self
                        .store
                        .record_activity(&record.id, current.last_activity_at)
                        .await
                    {
                        warn!(session_id = %record.id, error = %e, "Failed to write back activity");
                    }
                    continue;
                }
            }

            match self.store.delete(&record.id).await {
                Ok(_) => {}
                Err(e) => {
                    warn!(session_id = %record.id, error = %e, "Failed to delete expired session");
                    continue;
                }
            }

            let owner_id = match self.registry.remove_by_id(&record.id) {
                Some(session) => {
                    session.update(|r| r.transition(SessionStatus::Destroyed)).ok();
                    if let Err(e) = session.handle().destroy().await {
                        warn!(session_id = %record.id, error = %e, "Backend destroy failed during cleanup");
                    }
                    session.owner_id()
                }
                None => record.owner_id.clone(),
            };
            self.cache.delete(&cache_key(&record.id)).await;

            debug!(owner_id = %owner_id, session_id = %record.id, "Expired session removed");
            self.emit(SessionEvent::Destroyed {
                owner_id,
                session_id: record.id,
                reason: DestroyReason::Expired,
            });
            cleaned += 1;
        }

        if cleaned > 0 {
            self.metrics.increment("sessions.cleaned", cleaned as u64, &[]);
            self.report_active();
            info!(cleaned, "Cleaned up inactive sessions");
        }
        cleaned
    }
}
