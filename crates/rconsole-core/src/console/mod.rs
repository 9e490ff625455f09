//! Console Module - Rails console process management
//!
//! Architecture: tokio::process (pipes) + prompt detection (regex) + one coarse session lock
//!
//! # Components
//! - `OutputBuffer`: bounded stdout accumulator
//! - `detector`: completion detection and error classification
//! - `TargetResolver`: turns configuration into a launch command
//! - `ConsoleProcess`: a single spawned console
//! - `executor`: run one command against a live console
//! - `ConsoleSession`: public entry point

mod buffer;
pub mod detector;
pub mod executor;
mod session;
mod supervisor;
mod target;

pub use buffer::OutputBuffer;
pub use session::ConsoleSession;
pub use supervisor::ConsoleProcess;
pub use target::{ConfiguredTarget, LaunchSpec, TargetResolver};
