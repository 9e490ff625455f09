//! rconsole-mcp - MCP stdio server for a Rails console
//!
//! Launched by an MCP client. The console itself starts on the first
//! `execute` call and is shut down when stdin closes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use rconsole_core::{ConfiguredTarget, ConsoleConfig, ConsoleSession, TargetMode};
use rconsole_mcp::{ConsoleToolHandler, McpServer};

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("RCONSOLE_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol; logs go to stderr only
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = ConsoleConfig::from_env().context("Invalid console configuration")?;
    match &config.target {
        TargetMode::Container { name } => info!(container = %name, "Console target"),
        TargetMode::Kubernetes {
            selector, namespace, ..
        } => info!(%selector, %namespace, "Console target"),
    }

    let target = Arc::new(ConfiguredTarget::new(&config));
    let session = Arc::new(ConsoleSession::new(config, target));

    let server = McpServer::new(ConsoleToolHandler::new(Arc::clone(&session)));
    let served = server.run().await;

    session.shutdown().await;
    served
}
