//! Authorization for session handoff.
//!
//! The coordinator asks a [`SecurityAuthority`] before moving a session
//! between owners. Two authorities ship:
//! - [`ConfigAuthority`]: allow/deny lists from [`HandoffConfig`]
//! - [`StaticAuthority`]: a fixed answer, for tests and trusted deployments

use crate::config::HandoffConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait SecurityAuthority: Send + Sync {
    /// Whether `from` may hand `session_id` to `to`.
    async fn can_handoff_session(&self, from: &str, to: &str, session_id: &str) -> Result<bool>;
}

/// Policy from configuration.
///
/// A handoff is allowed when the source is not blocked and the target is
/// listed in `allowed_targets` (an empty list allows any target).
#[derive(Debug, Clone, Default)]
pub struct ConfigAuthority {
    allowed_targets: HashSet<String>,
    blocked_sources: HashSet<String>,
}

impl ConfigAuthority {
    pub fn new(config: &HandoffConfig) -> Self {
        Self {
            allowed_targets: config.allowed_targets.iter().cloned().collect(),
            blocked_sources: config.blocked_sources.iter().cloned().collect(),
        }
    }

    fn allows(&self, from: &str, to: &str) -> bool {
        if self.blocked_sources.contains(from) {
            return false;
        }
        self.allowed_targets.is_empty() || self.allowed_targets.contains(to)
    }
}

#[async_trait]
impl SecurityAuthority for ConfigAuthority {
    async fn can_handoff_session(&self, from: &str, to: &str, _session_id: &str) -> Result<bool> {
        Ok(self.allows(from, to))
    }
}

/// Answers every request the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthority {
    allow: bool,
}

impl StaticAuthority {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

#[async_trait]
impl SecurityAuthority for StaticAuthority {
    async fn can_handoff_session(&self, _from: &str, _to: &str, _session_id: &str) -> Result<bool> {
        Ok(self.allow)
    }
}
