//! Coordinator configuration.
//!
//! Loaded from TOML with every field defaulted, then optionally overridden by
//! `HANDOFF_*` environment variables:
//! 1. Environment variables
//! 2. Config file
//! 3. Default values

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Live sessions allowed per owner
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: u32,

    /// Inactivity timeout for sessions without their own
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Period of the background cleanup sweep
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub handoff: HandoffConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Prefix for every cache key
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Session creations allowed per window
    #[serde(default = "default_rate_limit")]
    pub limit: u32,

    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_ms")]
    pub ttl_ms: u64,

    #[serde(default = "default_lock_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_lock_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Take `lock:create:{owner}` around session creation
    #[serde(default = "default_true")]
    pub guard_create: bool,
}

/// Handoff policy used by [`ConfigAuthority`](crate::auth::ConfigAuthority).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Owners allowed to receive sessions; empty allows everyone
    #[serde(default)]
    pub allowed_targets: Vec<String>,

    /// Owners never allowed to hand sessions away
    #[serde(default)]
    pub blocked_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// tmux session name prefix
    #[serde(default = "default_tmux_prefix")]
    pub tmux_prefix: String,

    pub working_dir: Option<PathBuf>,

    /// Shell command started in each new session
    pub shell: Option<String>,
}

// Default value functions
fn default_max_sessions_per_user() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_namespace() -> String {
    "handoff".to_string()
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_lock_ttl_ms() -> u64 {
    30_000
}

fn default_lock_max_retries() -> u32 {
    10
}

fn default_lock_retry_delay_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_tmux_prefix() -> String {
    "handoff".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: default_max_sessions_per_user(),
            default_timeout_secs: default_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            lock: LockConfig::default(),
            handoff: HandoffConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            namespace: default_namespace(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_rate_window_secs(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_lock_ttl_ms(),
            max_retries: default_lock_max_retries(),
            retry_delay_ms: default_lock_retry_delay_ms(),
            guard_create: default_true(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            tmux_prefix: default_tmux_prefix(),
            working_dir: None,
            shell: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Apply `HANDOFF_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("HANDOFF_MAX_SESSIONS_PER_USER") {
            self.max_sessions_per_user = parse_env("HANDOFF_MAX_SESSIONS_PER_USER", &v)?;
        }
        if let Some(v) = lookup("HANDOFF_DEFAULT_TIMEOUT_SECS") {
            self.default_timeout_secs = parse_env("HANDOFF_DEFAULT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("HANDOFF_RATE_LIMIT") {
            self.rate_limit.limit = parse_env("HANDOFF_RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("HANDOFF_RATE_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_env("HANDOFF_RATE_WINDOW_SECS", &v)?;
        }
        Ok(())
    }

    /// Reject settings that would disable a limit or spin a timer.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("max_sessions_per_user", self.max_sessions_per_user as u64),
            ("default_timeout_secs", self.default_timeout_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("rate_limit.limit", self.rate_limit.limit as u64),
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            ("lock.ttl_ms", self.lock.ttl_ms),
            ("lock.max_retries", self.lock.max_retries as u64),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{} must be greater than zero", name)));
        }
        if self.cache.namespace.is_empty() {
            return Err(Error::Config("cache.namespace must not be empty".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_sessions_per_user, 5);
        assert_eq!(config.default_timeout_secs, 3600);
        assert_eq!(config.cleanup_interval_secs, 300);
        assert_eq!(config.cache.namespace, "handoff");
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.lock.ttl_ms, 30_000);
        assert!(config.lock.guard_create);
        assert!(config.handoff.allowed_targets.is_empty());
        assert_eq!(config.backend.tmux_prefix, "handoff");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            max_sessions_per_user = 2

            [rate_limit]
            limit = 3

            [handoff]
            blocked_sources = ["mallory"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_sessions_per_user, 2);
        assert_eq!(config.rate_limit.limit, 3);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.handoff.blocked_sources, vec!["mallory".to_string()]);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = CoordinatorConfig::default();
        config.backend.working_dir = Some(PathBuf::from("/srv/work"));
        let text = config.to_toml_string().unwrap();
        assert_eq!(CoordinatorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempdir().unwrap();
        let config = CoordinatorConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cleanup_interval_secs = 30\n").unwrap();
        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.cleanup_interval_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HANDOFF_MAX_SESSIONS_PER_USER", "9"),
            ("HANDOFF_RATE_WINDOW_SECS", " 120 "),
        ]
        .into_iter()
        .collect();
        let mut config = CoordinatorConfig::default();
        config
            .apply_env_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_sessions_per_user, 9);
        assert_eq!(config.rate_limit.window_secs, 120);
        assert_eq!(config.rate_limit.limit, 10);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = CoordinatorConfig::default();
        let err = config
            .apply_env_from(|name| (name == "HANDOFF_RATE_LIMIT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HANDOFF_RATE_LIMIT"));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = CoordinatorConfig::default();
        config.rate_limit.window_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.window_secs"));
    }
}
