//! Accelerator server process management.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

/// A spawned server. Killed on [`ServerProcess::kill`] or drop, whichever
/// comes first.
pub struct ServerProcess {
    child: Arc<Mutex<Option<Child>>>,
    binary: PathBuf,
    pid: u32,
}

/// Kills the server from another thread (e.g. a Ctrl+C handler).
#[derive(Clone)]
pub struct ProcessKiller {
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessKiller {
    pub fn kill(&self) -> Result<bool, ProcessError> {
        kill_child(&self.child)
    }
}

fn kill_child(slot: &Mutex<Option<Child>>) -> Result<bool, ProcessError> {
    let mut guard = slot.lock().map_err(|_| ProcessError::LockError)?;
    let Some(mut child) = guard.take() else {
        return Ok(false);
    };

    let pid = child.id();
    // Already exited on its own: just reap.
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!(pid, %status, "server had already exited");
        return Ok(false);
    }
    child.kill().map_err(|e| ProcessError::Kill(e.to_string()))?;
    let status = child.wait().map_err(|e| ProcessError::Kill(e.to_string()))?;
    tracing::debug!(pid, %status, "server killed");
    Ok(true)
}

impl ServerProcess {
    /// Start `binary` in the background. Stdout and stderr are inherited;
    /// stdin is closed.
    pub fn spawn(binary: &Path, args: &[String]) -> Result<Self, ProcessError> {
        if binary.components().count() > 1 && !binary.exists() {
            return Err(ProcessError::BinaryNotFound(binary.to_string_lossy().to_string()));
        }

        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                binary: binary.to_string_lossy().to_string(),
                message: e.to_string(),
            })?;

        let pid = child.id();
        tracing::info!(pid, binary = %binary.display(), "server started");
        Ok(Self {
            child: Arc::new(Mutex::new(Some(child))),
            binary: binary.to_path_buf(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn killer(&self) -> ProcessKiller {
        ProcessKiller {
            child: Arc::clone(&self.child),
        }
    }

    /// Exit status if the server has exited on its own. Does not reap a
    /// killed process twice.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().ok()?;
        guard.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    /// Terminate and reap. Returns true if this call killed a live process;
    /// later calls are no-ops.
    pub fn kill(&mut self) -> Result<bool, ProcessError> {
        kill_child(&self.child)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::warn!(pid = self.pid, "failed to kill server: {}", e);
        }
    }
}

/// Process management errors
#[derive(Debug)]
pub enum ProcessError {
    BinaryNotFound(String),
    Spawn { binary: String, message: String },
    Exited(String),
    Kill(String),
    LockError,
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::BinaryNotFound(path) => write!(f, "Server binary not found: {}", path),
            ProcessError::Spawn { binary, message } => write!(f, "Failed to spawn server {}: {}", binary, message),
            ProcessError::Exited(status) => write!(f, "Server exited during startup: {}", status),
            ProcessError::Kill(e) => write!(f, "Failed to kill server: {}", e),
            ProcessError::LockError => write!(f, "Failed to acquire lock"),
        }
    }
}

impl std::error::Error for ProcessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary() {
        let err = ServerProcess::spawn(Path::new("/nonexistent/dir/xrt_server"), &[])
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::BinaryNotFound(_)));
    }
}
