//! Application state.

use handoff_core::auth::ConfigAuthority;
use handoff_core::backend::SessionBackend;
use handoff_core::kv::MemoryKv;
use handoff_core::metrics::TracingMetrics;
use handoff_core::{CoordinatorConfig, Database, SessionEvent, SessionManager, SqliteStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub manager: Arc<SessionManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: CoordinatorConfig,
        db: Database,
        backend: Arc<dyn SessionBackend>,
    ) -> Arc<Self> {
        let db = Arc::new(db);
        let authority = ConfigAuthority::new(&coordinator.handoff);
        let manager = SessionManager::new(
            coordinator,
            Arc::new(SqliteStore::new(Arc::clone(&db))),
            Arc::new(MemoryKv::new()),
            backend,
            Arc::new(authority),
            Arc::new(TracingMetrics),
        );

        Arc::new(Self {
            config,
            db,
            manager,
            started_at: Instant::now(),
        })
    }

    /// Log lifecycle events until the manager goes away.
    pub fn spawn_event_logger(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.manager.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event logger fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Created {
            owner_id,
            session_id,
        } => info!(owner_id, session_id, "Session created"),
        SessionEvent::Destroyed {
            owner_id,
            session_id,
            reason,
        } => info!(owner_id, session_id, ?reason, "Session destroyed"),
        SessionEvent::HandedOff {
            session_id,
            from,
            to,
        } => info!(session_id, from, to, "Session handed off"),
    }
}
