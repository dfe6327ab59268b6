//! Single-instance guard.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Check if a process exists by PID
fn process_exists(pid: i32) -> bool {
    // On Unix, sending signal 0 checks if process exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: it exists but belongs to another user.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Owns the PID file for the life of the server; removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Fail if another live server owns `path`, otherwise claim it.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let pid_str = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match pid_str.trim().parse::<i32>() {
                Ok(pid) if pid != std::process::id() as i32 && process_exists(pid) => {
                    anyhow::bail!("Server already running with PID {}", pid);
                }
                Ok(_) => info!("Cleaning up stale PID file from previous crash"),
                Err(_) => warn!(path = %path.display(), "Ignoring unreadable PID file"),
            }
        }

        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}
