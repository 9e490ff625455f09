//! MCP (Model Context Protocol) server for a Rails console
//!
//! Newline-delimited JSON-RPC 2.0 over stdio, exposing one tool:
//!
//! - `execute {code, timeout?}`: run Ruby in the shared console session and
//!   return `{success, output, error?}`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rconsole_core::{ConfiguredTarget, ConsoleConfig, ConsoleSession};
//! use rconsole_mcp::{ConsoleToolHandler, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConsoleConfig::from_env()?;
//!     let target = Arc::new(ConfiguredTarget::new(&config));
//!     let session = Arc::new(ConsoleSession::new(config, target));
//!
//!     McpServer::new(ConsoleToolHandler::new(session)).run().await
//! }
//! ```

pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handler::ConsoleToolHandler;
pub use protocol::{Request, RequestId, Response, RpcError};
pub use server::{McpServer, ToolHandler};
pub use tools::{all_tools, get_tool, ExecuteArgs, ToolContent, ToolDefinition, ToolResult};
