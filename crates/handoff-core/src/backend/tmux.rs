//! tmux execution backend.
//!
//! One detached tmux session per coordinator session, named
//! `{prefix}-{session_id}`. Every tmux invocation runs on the blocking pool.

use super::{SessionBackend, SessionHandle, SessionSpec};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::types::SessionRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Scrollback lines kept by `serialize_state`.
const CAPTURE_LINES: u32 = 500;

/// Check if tmux is installed and available.
pub fn check_tmux() -> Result<()> {
    match which::which("tmux") {
        Ok(path) => {
            debug!("Found tmux at: {:?}", path);
            Ok(())
        }
        Err(_) => Err(Error::TmuxNotFound),
    }
}

fn run_tmux(args: &[&str]) -> Result<String> {
    let output = Command::new("tmux").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Tmux(format!("{} failed: {}", args[0], stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Check if a tmux session exists.
pub fn session_exists(session_name: &str) -> Result<bool> {
    let output = Command::new("tmux")
        .args(["has-session", "-t", session_name])
        .output()?;
    Ok(output.status.success())
}

fn create_session(
    session_name: &str,
    working_dir: Option<&str>,
    shell: Option<&str>,
    env: &[(&str, &str)],
) -> Result<()> {
    if session_exists(session_name)? {
        return Err(Error::Tmux(format!("Session already exists: {}", session_name)));
    }

    let mut args = vec!["new-session", "-d", "-s", session_name];
    if let Some(cwd) = working_dir {
        args.push("-c");
        args.push(cwd);
    }
    if let Some(cmd) = shell {
        args.push(cmd);
    }
    run_tmux(&args)?;

    for &(key, value) in env {
        if let Err(e) = run_tmux(&["set-environment", "-t", session_name, key, value]) {
            warn!(session = session_name, key, error = %e, "Failed to set session environment");
        }
    }

    debug!("Created tmux session: {}", session_name);
    Ok(())
}

fn kill_session(session_name: &str) -> Result<()> {
    if !session_exists(session_name)? {
        return Err(Error::SessionNotFound(session_name.to_string()));
    }
    run_tmux(&["kill-session", "-t", session_name])?;
    debug!("Killed tmux session: {}", session_name);
    Ok(())
}

fn capture_pane(session_name: &str, lines: u32) -> Result<String> {
    if !session_exists(session_name)? {
        return Err(Error::SessionNotFound(session_name.to_string()));
    }
    let start = format!("-{}", lines);
    run_tmux(&["capture-pane", "-t", session_name, "-p", "-S", start.as_str()])
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Creates and restores sessions as tmux sessions.
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    prefix: String,
    working_dir: Option<PathBuf>,
    shell: Option<String>,
}

impl TmuxBackend {
    /// Fails with [`Error::TmuxNotFound`] when tmux is not installed.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        check_tmux()?;
        Ok(Self {
            prefix: config.tmux_prefix.clone(),
            working_dir: config.working_dir.clone(),
            shell: config.shell.clone(),
        })
    }

    pub fn session_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.prefix, session_id)
    }

    async fn start(&self, spec: &SessionSpec) -> Result<Arc<dyn SessionHandle>> {
        let name = self.session_name(&spec.session_id);
        let working_dir = self
            .working_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let shell = self.shell.clone();
        let session_id = spec.session_id.clone();
        let owner_id = spec.owner_id.clone();
        let kind = spec.kind.to_string();

        let tmux_name = name.clone();
        blocking(move || {
            create_session(
                &tmux_name,
                working_dir.as_deref(),
                shell.as_deref(),
                &[
                    ("HANDOFF_SESSION_ID", session_id.as_str()),
                    ("HANDOFF_OWNER_ID", owner_id.as_str()),
                    ("HANDOFF_SESSION_KIND", kind.as_str()),
                ],
            )
        })
        .await?;

        Ok(Arc::new(TmuxHandle::new(name)))
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn SessionHandle>> {
        self.start(spec).await
    }

    async fn restore(&self, record: &SessionRecord) -> Result<Arc<dyn SessionHandle>> {
        let name = self.session_name(&record.id);
        let probe = name.clone();
        if blocking(move || session_exists(&probe)).await? {
            debug!(session_id = %record.id, "Re-attached to surviving tmux session");
            return Ok(Arc::new(TmuxHandle::new(name)));
        }
        debug!(session_id = %record.id, "tmux session gone, recreating");
        self.start(&SessionSpec::from(record)).await
    }
}

/// Handle to one tmux session.
///
/// Liveness is cached: `is_alive` reads the last observation, which `touch`
/// and `refresh_liveness` update from the blocking pool.
#[derive(Debug)]
pub struct TmuxHandle {
    name: String,
    destroyed: AtomicBool,
    alive: AtomicBool,
}

impl TmuxHandle {
    fn new(name: String) -> Self {
        Self {
            name,
            destroyed: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SessionHandle for TmuxHandle {
    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let name = self.name.clone();
        match blocking(move || kill_session(&name)).await {
            // Already gone is as good as destroyed.
            Ok(()) | Err(Error::SessionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn touch(&self) -> Result<()> {
        let name = self.name.clone();
        let now = chrono::Utc::now().timestamp_millis().to_string();
        let touched = blocking(move || {
            run_tmux(&[
                "set-option",
                "-t",
                name.as_str(),
                "@handoff_last_activity",
                now.as_str(),
            ])
        })
        .await;
        match touched {
            Ok(_) => {
                self.alive.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.refresh_liveness().await;
                Err(e)
            }
        }
    }

    async fn serialize_state(&self) -> Result<serde_json::Value> {
        let name = self.name.clone();
        let scrollback = blocking(move || capture_pane(&name, CAPTURE_LINES)).await?;
        Ok(serde_json::json!({
            "tmux_session": self.name,
            "captured_at": chrono::Utc::now().timestamp_millis(),
            "scrollback": scrollback,
        }))
    }

    fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && self.alive.load(Ordering::SeqCst)
    }

    async fn refresh_liveness(&self) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            return false;
        }
        let name = self.name.clone();
        let exists = match blocking(move || session_exists(&name)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(session = %self.name, error = %e, "tmux liveness probe failed");
                false
            }
        };
        self.alive.store(exists, Ordering::SeqCst);
        self.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> TmuxBackend {
        TmuxBackend {
            prefix: "handoff".into(),
            working_dir: None,
            shell: None,
        }
    }

    #[test]
    fn test_session_name_format() {
        assert_eq!(backend().session_name("abc-123"), "handoff-abc-123");
    }

    #[tokio::test]
    async fn test_destroyed_handle_is_dead() {
        let handle = TmuxHandle::new("handoff-test-never-created".into());
        handle.destroyed.store(true, Ordering::SeqCst);
        assert!(!handle.is_alive());
        // Destroy after destroy is a no-op and never reaches tmux.
        handle.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_liveness_is_cached_until_refreshed() {
        let handle = TmuxHandle::new("handoff-test-never-created".into());
        // No tmux call happens here; the handle reports its last observation.
        assert!(handle.is_alive());

        // Either tmux is missing or the session does not exist: dead both ways.
        assert!(!handle.refresh_liveness().await);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_refresh_skips_tmux_after_destroy() {
        let handle = TmuxHandle::new("handoff-test-never-created".into());
        handle.destroyed.store(true, Ordering::SeqCst);
        assert!(!handle.refresh_liveness().await);
        assert!(handle.alive.load(Ordering::SeqCst));
    }

    #[test]
    fn test_check_tmux() {
        // Just verify it doesn't panic
        let _ = check_tmux();
    }
}
