//! Server configuration.

use crate::cli::Cli;
use anyhow::Context;
use handoff_core::CoordinatorConfig;
use std::path::{Path, PathBuf};

/// Server paths
#[derive(Debug, Clone)]
pub struct Config {
    /// Base data directory
    pub data_dir: PathBuf,
    /// Coordinator config file
    pub config_path: PathBuf,
    /// SQLite database
    pub database_path: PathBuf,
    /// PID file path
    pub pid_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::in_dir(home.join(".handoff"))
    }
}

impl Config {
    /// Paths under `data_dir`.
    ///
    /// ```text
    /// ~/.handoff/
    /// ├── config.toml           # Coordinator configuration
    /// ├── sessions.db           # Durable session store
    /// └── server/
    ///     └── server.pid        # PID file
    /// ```
    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("config.toml"),
            database_path: data_dir.join("sessions.db"),
            pid_file: data_dir.join("server").join("server.pid"),
            data_dir,
        }
    }

    /// Resolve paths from `HANDOFF_DIR` (or `~/.handoff`) and CLI overrides,
    /// creating the directories they need.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = match std::env::var("HANDOFF_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".handoff"),
        };

        let mut config = Self::in_dir(data_dir);
        if let Some(path) = &cli.config {
            config.config_path = path.clone();
        }
        if let Some(path) = &cli.database {
            config.database_path = path.clone();
        }

        config.ensure_dirs()?;
        Ok(config)
    }

    fn ensure_dirs(&self) -> anyhow::Result<()> {
        for path in [&self.pid_file, &self.database_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }

    /// Coordinator settings: file, then `HANDOFF_*` overrides, then validation.
    pub fn coordinator(&self) -> anyhow::Result<CoordinatorConfig> {
        load_coordinator(&self.config_path)
    }
}

fn load_coordinator(path: &Path) -> anyhow::Result<CoordinatorConfig> {
    let mut config = CoordinatorConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.config_path.ends_with("config.toml"));
        assert!(config.database_path.ends_with("sessions.db"));
        assert!(config.pid_file.ends_with("server/server.pid"));
    }

    #[test]
    fn test_default_config_directory_structure() {
        let config = Config::default();
        if let Some(home) = dirs::home_dir() {
            let data_dir = home.join(".handoff");
            assert!(config.config_path.starts_with(&data_dir));
            assert!(config.database_path.starts_with(&data_dir));
            assert!(config.pid_file.starts_with(&data_dir));
        }
    }

    #[test]
    fn test_load_with_custom_dir_and_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom_path = temp_dir.path().to_path_buf();
        let db_path = custom_path.join("elsewhere").join("custom.db");

        let old_val = env::var("HANDOFF_DIR").ok();
        // SAFETY: only this test touches HANDOFF_DIR and it restores the value
        unsafe { env::set_var("HANDOFF_DIR", &custom_path) };

        let cli = Cli::parse_from([
            "handoff-server",
            "--database",
            db_path.to_str().unwrap(),
        ]);
        let config = Config::load(&cli).unwrap();

        // SAFETY: Restoring environment to previous state
        unsafe {
            match old_val {
                Some(val) => env::set_var("HANDOFF_DIR", val),
                None => env::remove_var("HANDOFF_DIR"),
            }
        }

        assert!(config.config_path.starts_with(&custom_path));
        assert_eq!(config.database_path, db_path);
        assert!(custom_path.join("server").exists());
        assert!(custom_path.join("elsewhere").exists());
    }

    #[test]
    fn test_coordinator_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "max_sessions_per_user = 3\n[lock]\nguard_create = false\n").unwrap();

        let config = load_coordinator(&path).unwrap();
        assert_eq!(config.max_sessions_per_user, 3);
        assert!(!config.lock.guard_create);
    }

    #[test]
    fn test_coordinator_rejects_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "cleanup_interval_secs = 0\n").unwrap();

        assert!(load_coordinator(&path).is_err());
    }
}
