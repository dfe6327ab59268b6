//! Execution backend seam.
//!
//! The coordinator never runs user work itself. It asks a [`SessionBackend`]
//! for a [`SessionHandle`] when a session is created or restored and drives
//! that handle through touch, state capture and destroy.

mod tmux;

pub use tmux::{TmuxBackend, TmuxHandle};

use crate::error::Result;
use crate::types::{SessionKind, SessionPayload, SessionRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// What the backend needs to start a session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session_id: String,
    pub owner_id: String,
    pub channel_id: Option<String>,
    pub kind: SessionKind,
    pub config: SessionPayload,
}

impl From<&SessionRecord> for SessionSpec {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            channel_id: record.channel_id.clone(),
            kind: record.kind,
            config: record.config.clone(),
        }
    }
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn SessionHandle>>;

    /// Re-attach to a session that outlived the previous process, or start a
    /// replacement carrying the same id.
    async fn restore(&self, record: &SessionRecord) -> Result<Arc<dyn SessionHandle>>;
}

#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn destroy(&self) -> Result<()>;

    /// Note user activity.
    async fn touch(&self) -> Result<()>;

    /// Snapshot of the running session, persisted by the coordinator on request.
    async fn serialize_state(&self) -> Result<serde_json::Value>;

    /// Cheap liveness predicate; must not block for long.
    fn is_alive(&self) -> bool;

    /// Re-probe the backend and update what [`is_alive`](Self::is_alive)
    /// reports. Called by the cleanup sweep.
    async fn refresh_liveness(&self) -> bool {
        self.is_alive()
    }
}
