//! Session data model shared by the store, cache and coordinator.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────────────────────
// Status & Kind
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Idle,
    HandoffPending,
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::HandoffPending => "handoff-pending",
            SessionStatus::Destroyed => "destroyed",
        }
    }

    /// Whether `self -> next` is an allowed lifecycle edge.
    ///
    /// ```text
    /// initializing → active ⇄ idle
    /// active → handoff-pending → active
    /// (any but destroyed) → destroyed
    /// ```
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Initializing, Active) => true,
            (Active, Idle) | (Idle, Active) => true,
            (Active, HandoffPending) | (HandoffPending, Active) => true,
            _ => false,
        }
    }

    /// Counts toward the owner's quota.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionStatus::Destroyed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(SessionStatus::Initializing),
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "handoff-pending" => Ok(SessionStatus::HandoffPending),
            "destroyed" => Ok(SessionStatus::Destroyed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Kind of session, passed through to the execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Ephemeral,
    Persistent,
    Templated,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Ephemeral => "ephemeral",
            SessionKind::Persistent => "persistent",
            SessionKind::Templated => "templated",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(SessionKind::Ephemeral),
            "persistent" => Ok(SessionKind::Persistent),
            "templated" => Ok(SessionKind::Templated),
            other => Err(format!("unknown session kind: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque, versioned backend configuration. Stored and forwarded, never inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub version: u32,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Default for SessionPayload {
    fn default() -> Self {
        Self {
            version: 1,
            data: serde_json::Value::Null,
        }
    }
}

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub owner_id: String,
    pub channel_id: Option<String>,
    pub status: SessionStatus,
    pub kind: SessionKind,
    pub config: SessionPayload,
    pub state: Option<serde_json::Value>,
    /// Inactivity timeout; the configured default applies when unset.
    pub timeout_secs: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_activity_at: i64,
}

impl SessionRecord {
    /// Build a fresh `initializing` record with a new id.
    pub fn new(owner_id: &str, options: &CreateOptions) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            channel_id: options.channel_id.clone(),
            status: SessionStatus::Initializing,
            kind: options.kind,
            config: options.config.clone(),
            state: None,
            timeout_secs: options.timeout_secs,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    /// Move to `next`, enforcing the lifecycle table.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    /// Refresh `last_activity_at`; an idle session becomes active again.
    pub fn touch(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_activity_at = now;
        self.updated_at = now;
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Active;
        }
    }

    /// Whether the record has been inactive past its timeout at `now_ms`.
    pub fn is_expired(&self, now_ms: i64, default_timeout_secs: i64) -> bool {
        let timeout_ms = self.timeout_secs.unwrap_or(default_timeout_secs) * 1000;
        now_ms - self.last_activity_at > timeout_ms
    }
}

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub session_id: Option<String>,
    pub actor_id: String,
    pub action: String,
    pub details: Option<String>,
    pub created_at: i64,
}

/// Per-owner quota view, derived from the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuota {
    pub owner_id: String,
    pub active: u32,
    pub max: u32,
}

impl UserQuota {
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.active)
    }

    pub fn is_exhausted(&self) -> bool {
        self.active >= self.max
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input Types
// ─────────────────────────────────────────────────────────────────────────────

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub channel_id: Option<String>,
    pub kind: SessionKind,
    pub config: SessionPayload,
    pub timeout_secs: Option<i64>,
}

/// Input for writing an audit log entry
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub session_id: Option<String>,
    pub actor_id: String,
    pub action: String,
    pub details: Option<String>,
}
