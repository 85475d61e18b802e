//! Shared subprocess plumbing: piped spawn with a bounded output buffer, and
//! two-phase (SIGINT, then timeout, then SIGKILL) graceful shutdown.
//!
//! Both the Tunnel Client (a long-lived binary) and the Sandbox Executor (a
//! one-shot container run) shell out to an external process and need the
//! same spawn/drain/terminate shape; this module is the common plumbing
//! factored out from that shape.

use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A combined stdout/stderr buffer capped at `max_bytes`. Once the cap is
/// reached, further lines are counted but not retained.
pub struct BoundedOutput {
    buf: Arc<Mutex<String>>,
    max_bytes: usize,
    dropped_lines: Arc<std::sync::atomic::AtomicU64>,
}

impl BoundedOutput {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(String::new())),
            max_bytes,
            dropped_lines: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Spawn tasks draining `child`'s stdout and stderr into this buffer,
    /// prefixing stderr lines so callers can tell the streams apart.
    pub fn drain(&self, child: &mut Child, label: &'static str) {
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, label, false);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, label, true);
        }
    }

    fn spawn_reader<R>(&self, reader: R, label: &'static str, is_stderr: bool)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let buf = self.buf.clone();
        let max_bytes = self.max_bytes;
        let dropped = self.dropped_lines.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if is_stderr {
                    debug!(process = label, "stderr: {line}");
                } else {
                    debug!(process = label, "stdout: {line}");
                }
                let mut guard = buf.lock().await;
                if guard.len() + line.len() + 1 > max_bytes {
                    dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    continue;
                }
                guard.push_str(&line);
                guard.push('\n');
            }
        });
    }

    pub async fn snapshot(&self) -> String {
        self.buf.lock().await.clone()
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Send `SIGINT`, wait up to `timeout`, then `SIGKILL` if the process has
/// not exited. On non-Unix platforms this skips straight to `kill()`.
pub async fn terminate_two_phase(child: &mut Child, timeout: std::time::Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is a valid process id obtained from our own
            // `Child` handle; `kill(2)` on an owned subprocess is safe.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "failed to send SIGINT");
            }
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "process exited after SIGINT"),
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for process, killing");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!("graceful shutdown timed out, sending SIGKILL");
            child.kill().await.ok();
        }
    }
}

/// Build a `Command` with stdin set to `/dev/null` and stdout/stderr piped,
/// the standard shape for both the tunnel binary and the container runtime.
pub fn piped_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_output_caps_at_max_bytes() {
        let mut cmd = piped_command("sh");
        cmd.arg("-c").arg("for i in $(seq 1 50); do echo line-$i; done");
        let mut child = cmd.spawn().unwrap();
        let output = BoundedOutput::new(16);
        output.drain(&mut child, "test");
        child.wait().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let snap = output.snapshot().await;
        assert!(snap.len() <= 32, "buffer should stay near the cap, got {}", snap.len());
        assert!(output.dropped_lines() > 0);
    }

    #[tokio::test]
    async fn terminate_two_phase_kills_unresponsive_process() {
        let mut cmd = piped_command("sh");
        cmd.arg("-c").arg("trap '' INT; sleep 30");
        let mut child = cmd.spawn().unwrap();

        terminate_two_phase(&mut child, std::time::Duration::from_millis(200)).await;
        let status = child.try_wait().unwrap();
        assert!(status.is_some(), "process should have been killed");
    }
}
