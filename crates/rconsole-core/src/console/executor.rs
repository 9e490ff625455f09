//! Command execution against a live console
//!
//! Write, then poll the buffer until the prompt comes back, the deadline
//! passes, or the process dies.

use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use super::detector;
use super::supervisor::ConsoleProcess;
use crate::types::ExecutionResult;

/// Interval between completion checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of waiting for an idle prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptWait {
    Ready,
    TimedOut,
    Exited,
}

/// Why a command did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFailure {
    TimedOut(Duration),
    Exited,
}

impl CommandFailure {
    pub fn describe(&self) -> String {
        match self {
            CommandFailure::TimedOut(timeout) => {
                format!("Command timed out after {}ms", timeout.as_millis())
            }
            CommandFailure::Exited => "Console process exited unexpectedly".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The prompt came back; the result may still be an interpreter error
    Completed(ExecutionResult),
    /// No prompt. `output` is whatever had arrived.
    Failed {
        failure: CommandFailure,
        output: String,
    },
}

/// Poll `process` until its output ends with an idle prompt.
///
/// The prompt is checked before liveness so a console that printed its
/// prompt and then exited still counts as ready.
pub async fn wait_for_prompt(process: &ConsoleProcess, timeout: Duration) -> PromptWait {
    let deadline = Instant::now() + timeout;
    loop {
        let text = detector::strip_control_sequences(&process.output());
        if detector::is_complete(&text) {
            return PromptWait::Ready;
        }
        if !process.is_alive() {
            return PromptWait::Exited;
        }
        if Instant::now() >= deadline {
            return PromptWait::TimedOut;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Cleaned output with any trailing prompt removed
pub fn response_text(process: &ConsoleProcess) -> String {
    let text = detector::strip_control_sequences(&process.output());
    detector::extract_response(&text).trim().to_string()
}

/// Classify a completed response
pub fn classify(response: String) -> ExecutionResult {
    match detector::detect_error(&response) {
        Some(line) => ExecutionResult::failure(response, line),
        None => ExecutionResult::ok(response),
    }
}

/// Run one command. The caller owns restart policy for `Failed` outcomes.
///
/// `timeout` covers the write as well as the wait: a console that stops
/// reading stdin fills the pipe and would otherwise block the write forever.
pub async fn run(process: &mut ConsoleProcess, code: &str, timeout: Duration) -> CommandOutcome {
    let deadline = Instant::now() + timeout;
    process.clear_output();

    debug!(process = %process.id(), bytes = code.len(), "Writing command");
    match timeout_at(deadline, process.write_line(code)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(process = %process.id(), error = %e, "Console write failed");
            return CommandOutcome::Failed {
                failure: CommandFailure::Exited,
                output: response_text(process),
            };
        }
        Err(_) => {
            warn!(process = %process.id(), "Console stopped reading input");
            return CommandOutcome::Failed {
                failure: CommandFailure::TimedOut(timeout),
                output: response_text(process),
            };
        }
    }

    let wait = wait_for_prompt(process, deadline.saturating_duration_since(Instant::now())).await;
    let output = response_text(process);
    match wait {
        PromptWait::Ready => CommandOutcome::Completed(classify(output)),
        PromptWait::TimedOut => CommandOutcome::Failed {
            failure: CommandFailure::TimedOut(timeout),
            output,
        },
        PromptWait::Exited => CommandOutcome::Failed {
            failure: CommandFailure::Exited,
            output,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let result = classify("SyntaxError: unexpected end-of-input".to_string());
        assert!(!result.success);
        assert_eq!(result.output, "SyntaxError: unexpected end-of-input");
        assert_eq!(result.error.as_deref(), Some("SyntaxError: unexpected end-of-input"));

        let result = classify("=> 42".to_string());
        assert!(result.success);
        assert_eq!(result.output, "=> 42");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            CommandFailure::TimedOut(Duration::from_millis(1500)).describe(),
            "Command timed out after 1500ms"
        );
        assert_eq!(CommandFailure::Exited.describe(), "Console process exited unexpectedly");
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::console::LaunchSpec;

        const FAKE_IRB: &str = r#"
printf 'irb(main):001:0> '
while IFS= read -r line; do
  case "$line" in
    slow) sleep 30 ;;
    die) exit 1 ;;
    bad) printf 'NameError: uninitialized constant Foo\n' ;;
    *) printf '=> %s\n' "$line" ;;
  esac
  printf '\033[0mirb(main):002:0> '
done
"#;

        fn spawn() -> ConsoleProcess {
            let spec = LaunchSpec {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), FAKE_IRB.to_string()],
                remote: false,
                label: "fake-irb".to_string(),
            };
            ConsoleProcess::spawn(&spec, 64 * 1024).unwrap()
        }

        #[tokio::test]
        async fn test_run_completes_on_prompt() {
            let mut console = spawn();
            assert_eq!(
                wait_for_prompt(&console, Duration::from_secs(5)).await,
                PromptWait::Ready
            );

            let outcome = run(&mut console, "1 + 1", Duration::from_secs(5)).await;
            assert_eq!(outcome, CommandOutcome::Completed(ExecutionResult::ok("=> 1 + 1")));

            let outcome = run(&mut console, "bad", Duration::from_secs(5)).await;
            match outcome {
                CommandOutcome::Completed(result) => {
                    assert!(!result.success);
                    assert_eq!(result.output, "NameError: uninitialized constant Foo");
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
            console.kill().await;
        }

        #[tokio::test]
        async fn test_run_times_out() {
            let mut console = spawn();
            wait_for_prompt(&console, Duration::from_secs(5)).await;

            let outcome = run(&mut console, "slow", Duration::from_millis(200)).await;
            assert_eq!(
                outcome,
                CommandOutcome::Failed {
                    failure: CommandFailure::TimedOut(Duration::from_millis(200)),
                    output: String::new(),
                }
            );
            console.kill().await;
        }

        #[tokio::test]
        async fn test_write_to_stalled_console_times_out() {
            // Prompt once, then never read stdin again
            let spec = LaunchSpec {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "printf 'irb(main):001:0> '; sleep 30".to_string()],
                remote: false,
                label: "stalled".to_string(),
            };
            let mut console = ConsoleProcess::spawn(&spec, 64 * 1024).unwrap();
            wait_for_prompt(&console, Duration::from_secs(5)).await;

            let code = "a".repeat(4 * 1024 * 1024);
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                run(&mut console, &code, Duration::from_millis(300)),
            )
            .await
            .expect("run must honour its own timeout");
            assert!(matches!(
                outcome,
                CommandOutcome::Failed { failure: CommandFailure::TimedOut(_), .. }
            ));
            console.kill().await;
        }

        #[tokio::test]
        async fn test_run_observes_exit() {
            let mut console = spawn();
            wait_for_prompt(&console, Duration::from_secs(5)).await;

            let outcome = run(&mut console, "die", Duration::from_secs(5)).await;
            assert!(matches!(
                outcome,
                CommandOutcome::Failed { failure: CommandFailure::Exited, .. }
            ));
        }
    }
}
