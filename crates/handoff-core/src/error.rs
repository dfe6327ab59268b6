//! Error types for handoff-core.
//!
//! Two layers:
//! - [`Error`]: infrastructure failures (SQLite, tmux, key/value store, IO).
//! - [`SessionError`]: the coordinator's taxonomy, surfaced to callers of
//!   [`SessionManager`](crate::session::SessionManager). It is `Clone` so that
//!   every waiter of a shared in-flight creation receives the same outcome.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using handoff-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for coordinator operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Core error types for infrastructure operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    // tmux errors
    #[error("tmux not found. Install tmux to host sessions.")]
    TmuxNotFound,

    #[error("tmux error: {0}")]
    Tmux(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Key/value store errors
    #[error("Key/value store error: {0}")]
    Kv(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a key/value store error
    pub fn kv(message: impl Into<String>) -> Self {
        Self::Kv(message.into())
    }

    /// Create a migration error
    pub fn migration(version: u32, message: impl Into<String>) -> Self {
        Self::Migration {
            version,
            message: message.into(),
        }
    }
}

/// Coordinator errors.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// The owner already holds the maximum number of live sessions.
    #[error("session quota exceeded for {owner_id}: {active}/{max} active sessions")]
    QuotaExceeded {
        owner_id: String,
        active: u32,
        max: u32,
    },

    /// Too many requests inside the sliding window; retry after `reset_at` (epoch ms).
    #[error("rate limited: {owner_id} may retry at {reset_at}")]
    RateLimited { owner_id: String, reset_at: i64 },

    /// Handoff refused by the security authority.
    #[error("handoff of {session_id} from {from} to {to} is not authorized")]
    Unauthorized {
        from: String,
        to: String,
        session_id: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Durable store unreachable or failing.
    #[error("durable store failure: {0}")]
    StoreFailure(#[source] Arc<Error>),

    /// Cache unreachable. Recovered locally; coordinator operations never return it.
    #[error("cache failure: {0}")]
    CacheFailure(String),

    /// The execution backend failed to create, restore or destroy a session.
    #[error("execution backend failure: {0}")]
    Backend(#[source] Arc<Error>),

    /// Another holder kept the distributed lock for the whole retry budget.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("invalid handoff: {0}")]
    InvalidHandoff(String),

    /// The handoff target already holds a live session.
    #[error("owner {owner_id} already holds a live session")]
    TargetOccupied { owner_id: String },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl SessionError {
    /// Wrap a durable store error
    pub fn store(err: Error) -> Self {
        Self::StoreFailure(Arc::new(err))
    }

    /// Wrap an execution backend error
    pub fn backend(err: Error) -> Self {
        Self::Backend(Arc::new(err))
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::LockUnavailable(_))
    }

    /// Short label used as a metrics tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::StoreFailure(_) => "store",
            Self::CacheFailure(_) => "cache",
            Self::Backend(_) => "backend",
            Self::LockUnavailable(_) => "lock",
            Self::InvalidHandoff(_) => "invalid_handoff",
            Self::TargetOccupied { .. } => "target_occupied",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Message suitable for showing to the end user who issued the request.
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExceeded { max, .. } => format!(
                "You already have {} active sessions. Close one before starting another.",
                max
            ),
            Self::RateLimited { reset_at, .. } => {
                let wait_secs = (reset_at - chrono::Utc::now().timestamp_millis()).max(0) / 1000;
                format!(
                    "Too many session requests. Try again in {} seconds.",
                    wait_secs.max(1)
                )
            }
            Self::Unauthorized { .. } => {
                "You are not allowed to hand this session to that user.".to_string()
            }
            Self::NotFound(_) => "No matching session was found.".to_string(),
            Self::TargetOccupied { .. } => {
                "The target user already has an active session.".to_string()
            }
            Self::InvalidHandoff(reason) => format!("Handoff rejected: {}", reason),
            Self::LockUnavailable(_) => {
                "Another request for this session is in progress. Try again shortly.".to_string()
            }
            Self::StoreFailure(_)
            | Self::CacheFailure(_)
            | Self::Backend(_)
            | Self::InvalidTransition { .. } => {
                "The session service is temporarily unavailable.".to_string()
            }
        }
    }
}
