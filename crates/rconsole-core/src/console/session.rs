//! Console Session - the single entry point for executing code
//!
//! One coarse `tokio::sync::Mutex` (FIFO-fair) guards the whole of
//! `execute`: spawn-if-needed, write, wait, classify, restart. The console
//! cannot attribute output to concurrent writers, so nothing finer exists.
//!
//! Lifecycle is `Option<ConsoleProcess>`: `None` is Empty, `Some` is Ready.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::executor::{self, CommandFailure, CommandOutcome, PromptWait};
use super::supervisor::ConsoleProcess;
use super::target::TargetResolver;
use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::types::ExecutionResult;

struct SessionState {
    process: Option<ConsoleProcess>,
    /// Set when a failure triggered a restart. Cleared by a cold start and
    /// also by any command that completes normally: a failure episode is a
    /// run of failures with no successful command in between, so a good
    /// command earns the console a fresh restart.
    restart_consumed: bool,
    /// Bumped by every `execute`; the idle timer only fires for its own generation
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

/// Shared, serialized Rails console session
pub struct ConsoleSession {
    config: Arc<ConsoleConfig>,
    resolver: Arc<dyn TargetResolver>,
    state: Arc<Mutex<SessionState>>,
}

impl ConsoleSession {
    pub fn new(config: ConsoleConfig, resolver: Arc<dyn TargetResolver>) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
            state: Arc::new(Mutex::new(SessionState {
                process: None,
                restart_consumed: false,
                generation: 0,
                idle_timer: None,
            })),
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Whether a live console is currently held
    pub async fn is_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.process.as_ref().is_some_and(ConsoleProcess::is_alive)
    }

    /// Execute `code` in the console.
    ///
    /// Calls are applied one at a time in arrival order. `timeout` overrides
    /// the configured command timeout for this call only. Never fails: every
    /// error becomes an unsuccessful `ExecutionResult`.
    pub async fn execute(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        let mut state = self.state.lock().await;
        let timeout = timeout.unwrap_or(self.config.command_timeout);

        let result = self.execute_locked(&mut state, code, timeout).await;

        self.arm_idle_timer(&mut state);
        result
    }

    async fn execute_locked(
        &self,
        state: &mut SessionState,
        code: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        // A console that died between calls is just Empty
        if state.process.as_ref().is_some_and(|p| !p.is_alive()) {
            info!("Console exited while idle, starting a new one");
            state.process = None;
        }

        if state.process.is_none() {
            match self.start_console().await {
                Ok(process) => {
                    state.process = Some(process);
                    state.restart_consumed = false;
                }
                Err(e) => {
                    error!(error = %e, "Failed to start console");
                    return ExecutionResult::failure(e.partial_output(), e.to_string());
                }
            }
        }

        let Some(process) = state.process.as_mut() else {
            return ExecutionResult::failure("", ConsoleError::NotRunning.to_string());
        };

        debug!(process = %process.id(), timeout_ms = timeout.as_millis() as u64, "Executing command");
        match executor::run(process, code, timeout).await {
            CommandOutcome::Completed(result) => {
                state.restart_consumed = false;
                result
            }
            CommandOutcome::Failed { failure, output } => {
                self.recover(state, failure, output).await
            }
        }
    }

    /// Restart-once handling after a timeout or crash
    async fn recover(
        &self,
        state: &mut SessionState,
        failure: CommandFailure,
        output: String,
    ) -> ExecutionResult {
        let reason = failure.describe();
        warn!(reason = %reason, "Command failed");

        if let Some(process) = state.process.take() {
            process.kill().await;
        }

        if state.restart_consumed {
            warn!("Console already restarted once, leaving session empty");
            return ExecutionResult::failure(
                output,
                format!(
                    "{}. The console was already restarted once and has been shut down; \
                     the next call will start a fresh console.",
                    reason
                ),
            );
        }

        state.restart_consumed = true;
        info!("Restarting console");
        match self.start_console().await {
            Ok(process) => {
                state.process = Some(process);
                ExecutionResult::failure(
                    output,
                    format!(
                        "{}. The console was restarted; variables and other session state were lost.",
                        reason
                    ),
                )
            }
            Err(e) => {
                error!(error = %e, "Console restart failed");
                ExecutionResult::failure(
                    output,
                    format!("{}. Restarting the console also failed: {}", reason, e),
                )
            }
        }
    }

    /// Resolve, spawn and wait for the first prompt
    async fn start_console(&self) -> Result<ConsoleProcess, ConsoleError> {
        let spec = self.resolver.resolve().await?;
        let startup_timeout = self.config.startup_timeout(spec.remote);
        let process = ConsoleProcess::spawn(&spec, self.config.max_output_bytes)?;

        match executor::wait_for_prompt(&process, startup_timeout).await {
            PromptWait::Ready => {
                info!(
                    process = %process.id(),
                    pid = ?process.pid(),
                    target = %spec.label,
                    "Console ready"
                );
                Ok(process)
            }
            PromptWait::TimedOut => {
                let output = executor::response_text(&process);
                process.kill().await;
                Err(ConsoleError::StartupTimeout {
                    timeout: startup_timeout,
                    output,
                })
            }
            PromptWait::Exited => {
                let output = executor::response_text(&process);
                Err(ConsoleError::StartupExited { output })
            }
        }
    }

    /// (Re)schedule the idle shutdown. Called with the lock held at the end
    /// of every `execute`.
    fn arm_idle_timer(&self, state: &mut SessionState) {
        state.generation += 1;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if state.process.is_none() {
            return;
        }

        let generation = state.generation;
        let inactivity = self.config.inactivity_timeout;
        let shared = Arc::clone(&self.state);
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inactivity).await;
            let mut state = shared.lock().await;
            if state.generation != generation {
                return;
            }
            if let Some(process) = state.process.take() {
                info!(
                    process = %process.id(),
                    idle_secs = inactivity.as_secs(),
                    "Closing idle console"
                );
                process.kill().await;
            }
            state.idle_timer = None;
        }));
    }

    /// Kill the console, if any. Pending calls still run afterwards and
    /// will start a new console.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if let Some(process) = state.process.take() {
            info!(process = %process.id(), "Shutting down console");
            process.kill().await;
        }
    }
}
