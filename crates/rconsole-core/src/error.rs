//! Error types for console sessions and configuration

use std::time::Duration;

/// Failures raised while resolving, starting or talking to a console process.
///
/// None of these escape `ConsoleSession::execute`; the session turns each
/// one into a failed `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("No running pod matched selector '{selector}' in namespace '{namespace}'")]
    Resolution { selector: String, namespace: String },

    #[error("Pod discovery failed: {0}")]
    Discovery(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Console did not show a prompt within {timeout:?}")]
    StartupTimeout { timeout: Duration, output: String },

    #[error("Console exited before showing a prompt")]
    StartupExited { output: String },

    #[error("Console process is not running")]
    NotRunning,

    #[error("Failed to write to console: {0}")]
    Write(#[from] std::io::Error),
}

impl ConsoleError {
    /// Output collected before the failure, if any.
    pub fn partial_output(&self) -> &str {
        match self {
            ConsoleError::StartupTimeout { output, .. } | ConsoleError::StartupExited { output } => {
                output
            }
            _ => "",
        }
    }
}

/// Invalid or missing configuration values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required when RCONSOLE_TARGET_MODE={1}")]
    Missing(&'static str, &'static str),

    #[error("Unknown target mode '{0}' (expected 'container' or 'kubernetes')")]
    UnknownMode(String),

    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },

    #[error("RCONSOLE_CONSOLE_COMMAND must not be empty")]
    EmptyCommand,
}
