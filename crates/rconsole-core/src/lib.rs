//! rconsole-core - Rails console session manager
//!
//! Drives one long-lived `rails console` process over stdio pipes and
//! exposes a single serialized "execute code, get result" operation.
//!
//! # Components
//! - `OutputBuffer`: bounded accumulator for console stdout
//! - `detector`: prompt-based completion detection and error classification
//! - `ConsoleProcess`: spawn, exit watching, kill
//! - `executor`: write one command and wait for its prompt
//! - `ConsoleSession`: lazy start, FIFO serialization, restart-once, inactivity close
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rconsole_core::{ConfiguredTarget, ConsoleConfig, ConsoleSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConsoleConfig::from_env()?;
//!     let target = Arc::new(ConfiguredTarget::new(&config));
//!     let session = ConsoleSession::new(config, target);
//!
//!     let result = session.execute("User.count", None).await;
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod types;

pub use config::{ConsoleConfig, TargetMode};
pub use console::{
    ConfiguredTarget, ConsoleProcess, ConsoleSession, LaunchSpec, OutputBuffer, TargetResolver,
};
pub use error::{ConfigError, ConsoleError};
pub use types::ExecutionResult;
