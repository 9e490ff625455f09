//! Console process supervision
//!
//! One `ConsoleProcess` per spawned console. Three background tasks hang off
//! it: a stdout pump into the `OutputBuffer`, a stderr pump into the log,
//! and an exit watcher. The exit watcher is the only writer of `alive`.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::buffer::OutputBuffer;
use super::target::LaunchSpec;
use crate::error::ConsoleError;

/// How long an exited console's stdout may keep draining into the buffer
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// A running console and its pipes
pub struct ConsoleProcess {
    id: String,
    pid: Option<u32>,
    stdin: ChildStdin,
    buffer: Arc<Mutex<OutputBuffer>>,
    alive: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited_rx: Option<oneshot::Receiver<()>>,
}

impl ConsoleProcess {
    /// Spawn the console described by `spec` with all three stdio streams piped
    pub fn spawn(spec: &LaunchSpec, max_output_bytes: usize) -> Result<Self, ConsoleError> {
        let id = format!(
            "console-{}-{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().to_string()[..8]
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(process = %id, target = %spec.label, program = %spec.program, "Spawning console");

        let mut child = cmd.spawn().map_err(|e| ConsoleError::Spawn {
            program: spec.program.clone(),
            source: e,
        })?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or(ConsoleError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(ConsoleError::NotRunning)?;
        let stderr = child.stderr.take().ok_or(ConsoleError::NotRunning)?;

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(max_output_bytes)));
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = oneshot::channel::<()>();

        let stdout_task = tokio::spawn(Self::stdout_loop(stdout, Arc::clone(&buffer)));
        tokio::spawn(Self::stderr_loop(stderr, id.clone()));

        // Exit watcher. A dropped kill_tx counts as a kill request.
        let alive_for_exit = Arc::clone(&alive);
        let id_for_exit = id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut kill_rx => None,
            };

            let requested = status.is_none();
            let status = match status {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(process = %id_for_exit, error = %e, "Failed to kill console");
                    }
                    child.wait().await
                }
            };

            // Let the last stdout bytes land before the handle goes invalid.
            // A grandchild may keep the pipe open, so this is bounded.
            if !requested {
                let _ = tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, stdout_task).await;
            }

            alive_for_exit.store(false, Ordering::SeqCst);
            let _ = exited_tx.send(());

            match status {
                Ok(status) if requested => {
                    info!(process = %id_for_exit, %status, "Console killed")
                }
                Ok(status) => {
                    warn!(process = %id_for_exit, %status, "Console exited unexpectedly")
                }
                Err(e) => error!(process = %id_for_exit, error = %e, "Failed to wait for console"),
            }
        });

        info!(process = %id, pid = ?pid, "Console spawned");

        Ok(Self {
            id,
            pid,
            stdin,
            buffer,
            alive,
            kill_tx: Some(kill_tx),
            exited_rx: Some(exited_rx),
        })
    }

    async fn stdout_loop<R>(mut stdout: R, buffer: Arc<Mutex<OutputBuffer>>)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    buf.append(&chunk[..n]);
                }
                Err(e) => {
                    debug!(error = %e, "Console stdout read error");
                    break;
                }
            }
        }
    }

    async fn stderr_loop<R>(stderr: R, id: String)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        warn!(process = %id, "console stderr: {}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(process = %id, error = %e, "Console stderr read error");
                    break;
                }
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// False once the process has exited for any reason
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn output(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    pub fn clear_output(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Write one line of input. Fails fast when the process is gone.
    pub async fn write_line(&mut self, code: &str) -> Result<(), ConsoleError> {
        if !self.is_alive() {
            return Err(ConsoleError::NotRunning);
        }
        let mut payload = String::with_capacity(code.len() + 1);
        payload.push_str(code);
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Kill the process and wait for the exit watcher to observe it
    pub async fn kill(mut self) {
        debug!(process = %self.id, "Killing console");
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(rx) = self.exited_rx.take() {
            let _ = rx.await;
        }
    }
}

impl Drop for ConsoleProcess {
    fn drop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            remote: false,
            label: "test".to_string(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stdout_reaches_buffer_and_stderr_does_not() {
        let mut process = ConsoleProcess::spawn(
            &sh("echo boot >&2; while IFS= read -r line; do echo \"got $line\"; done"),
            1024,
        )
        .unwrap();

        process.write_line("hello").await.unwrap();
        assert!(wait_until(|| process.output() == "got hello\n").await);

        process.clear_output();
        assert_eq!(process.output(), "");
        process.kill().await;
    }

    #[tokio::test]
    async fn test_exit_invalidates_handle() {
        let mut process = ConsoleProcess::spawn(&sh("read -r line; exit 3"), 1024).unwrap();
        assert!(process.is_alive());

        process.write_line("bye").await.unwrap();
        assert!(wait_until(|| !process.is_alive()).await);

        let err = process.write_line("again").await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotRunning));
    }

    #[tokio::test]
    async fn test_kill_stops_process() {
        let process = ConsoleProcess::spawn(&sh("sleep 30"), 1024).unwrap();
        let alive = Arc::clone(&process.alive);
        process.kill().await;
        assert!(!alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_output_is_bounded() {
        let process = ConsoleProcess::spawn(&sh("printf '0123456789abcdef'; sleep 30"), 4).unwrap();
        assert!(wait_until(|| process.output() == "cdef").await);
        process.kill().await;
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = LaunchSpec {
            program: "/nonexistent/rails-console".to_string(),
            args: vec![],
            remote: false,
            label: "missing".to_string(),
        };
        let err = ConsoleProcess::spawn(&spec, 1024).err().unwrap();
        assert!(matches!(err, ConsoleError::Spawn { .. }));
    }
}
