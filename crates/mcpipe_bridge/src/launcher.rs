//! Subprocess launcher: starts a [`LaunchSpec`] with all three stdio
//! streams piped and owns its termination.

use mcpipe_core::LaunchSpec;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// The piped streams of a freshly launched process, handed to the pumps.
#[derive(Debug)]
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
    pub stderr: BufReader<ChildStderr>,
}

/// Owner of a running subprocess.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
}

/// Start `spec` with piped stdin/stdout/stderr.
///
/// The child is killed if the handle is dropped without [`ProcessHandle::terminate`].
pub fn launch(spec: &LaunchSpec) -> Result<(ProcessHandle, ProcessPipes), BridgeError> {
    let mut cmd = spec.command();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| BridgeError::SpawnFailed {
        cause: format!("{}: {}", spec, e),
    })?;
    let pid = child.id();

    let missing = |stream: &str| BridgeError::SpawnFailed {
        cause: format!("failed to capture {} of '{}'", stream, spec),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    debug!(pid = ?pid, "Spawned '{}'", spec);
    Ok((
        ProcessHandle { child, pid },
        ProcessPipes {
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
        },
    ))
}

impl ProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not been reaped yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit, wait up to `timeout`, then force-kill it.
    ///
    /// Always leaves the process reaped; returns its exit status when known.
    pub async fn terminate(&mut self, timeout: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        self.request_exit();

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, ?status, "Server process terminated");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(pid = ?self.pid, error = %e, "Error waiting for server process, killing");
                self.child.kill().await.ok();
                None
            }
            Err(_) => {
                warn!(pid = ?self.pid, "Server process ignored termination request, killing");
                self.child.kill().await.ok();
                self.child.try_wait().ok().flatten()
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: pid comes from our own un-reaped Child, so it cannot
            // have been recycled for another process yet.
            #[allow(unsafe_code)]
            let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(pid = ?self.pid, error = %e, "Failed to stop server process");
        }
    }
}
