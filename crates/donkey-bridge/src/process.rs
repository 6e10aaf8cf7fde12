//! Simulator process supervision
//!
//! Launches the simulator executable bound to a host/port and guarantees it
//! does not outlive the session.

use donkey_rl_core::{DonkeyError, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A launched simulator process
pub struct ProcessSupervisor {
    path: PathBuf,
    child: Option<Child>,
    grace: Duration,
}

impl ProcessSupervisor {
    /// Launch `<exe> --host <host> --port <port>`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(path: impl AsRef<Path>, host: &str, port: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Launching simulator {} on {}:{}", path.display(), host, port);

        let child = Command::new(&path)
            .arg("--host")
            .arg(host)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DonkeyError::ProcessLaunchFailure {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!("Simulator pid {:?}", child.id());
        Ok(Self {
            path,
            child: Some(child),
            grace: Duration::from_secs(5),
        })
    }

    /// How long `quit` waits for a voluntary exit before killing
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Exit status if the process has already exited
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("Simulator {} exited with {}", self.path.display(), status);
                }
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll simulator process: {}", e);
                None
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && self.poll_exit().is_none()
    }

    /// Ask the simulator to exit, then kill it if it is still running after
    /// the grace period. Idempotent; returns `None` once already quit.
    pub async fn quit(&mut self) -> Result<Option<ExitStatus>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        debug!("Stopping simulator {}", self.path.display());
        request_exit(&child);
        match timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Simulator exited with {}", status);
                return Ok(Some(status));
            }
            Ok(Err(e)) => warn!("Waiting on simulator failed: {}", e),
            Err(_) => debug!("Simulator still running after {:?}, killing", self.grace),
        }

        if let Err(e) = child.start_kill() {
            // Already gone between the wait and the kill
            debug!("Kill failed: {}", e);
        }
        let status = child.wait().await?;
        info!("Simulator terminated ({})", status);
        Ok(Some(status))
    }
}

/// Send SIGTERM to a child that has not been reaped yet
#[cfg(unix)]
fn request_exit(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; `pid` is our own unreaped child
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!("SIGTERM to {} failed: {}", pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) {}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_executable() {
        let err = ProcessSupervisor::start("/nonexistent/donkey_sim", "127.0.0.1", 9091)
            .err()
            .unwrap();
        assert!(matches!(err, DonkeyError::ProcessLaunchFailure { .. }));
        assert!(!err.to_string().is_empty());
    }

    #[cfg(unix)]
    fn write_script(name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("donkey-sim-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join(name);
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quit_requests_graceful_exit() {
        let script = write_script(
            "graceful_sim.sh",
            "#!/bin/sh\ntrap 'exit 0' TERM\nwhile true; do sleep 0.05; done\n",
        );
        let mut sim = ProcessSupervisor::start(&script, "127.0.0.1", 9091)
            .unwrap()
            .with_grace(Duration::from_secs(20));
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = sim.quit().await.unwrap().unwrap();
        assert!(status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!sim.is_running());
        let _ = std::fs::remove_file(&script);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quit_kills_process_ignoring_term() {
        let script = write_script(
            "stubborn_sim.sh",
            "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 0.05; done\n",
        );
        let mut sim = ProcessSupervisor::start(&script, "127.0.0.1", 9091)
            .unwrap()
            .with_grace(Duration::from_millis(300));
        assert!(sim.pid().is_some());
        assert!(sim.is_running());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = sim.quit().await.unwrap().unwrap();
        assert!(!status.success());
        assert!(!sim.is_running());
        assert!(sim.pid().is_none());

        // Second quit is a no-op
        assert!(sim.quit().await.unwrap().is_none());
        let _ = std::fs::remove_file(&script);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_poll_exit_reports_early_exit() {
        let mut sim = ProcessSupervisor::start("/bin/sh", "127.0.0.1", 9091).unwrap();
        // `sh --host ...` fails immediately
        let status = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(status) = sim.poll_exit() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!status.success());
    }
}
