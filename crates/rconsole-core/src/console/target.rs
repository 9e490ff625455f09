//! Target resolution - which process to exec the console in
//!
//! A fixed container is launched directly. A Kubernetes target is looked up
//! with one `kubectl get pods` query per spawn attempt; the pod name is never
//! cached because the deployment may have rolled since the last spawn.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{ConsoleConfig, TargetMode};
use crate::error::ConsoleError;

/// Upper bound for the pod discovery query
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags passed through to IRB: no multi-line editor, so input and output stay line-oriented
const CONSOLE_FLAGS: [&str; 2] = ["--", "--nomultiline"];

/// A fully resolved command line for one console process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Reached over the network; gets the longer startup budget
    pub remote: bool,
    /// Human-readable target for logs (container or pod name)
    pub label: String,
}

/// Produces a launch command for each spawn attempt
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self) -> Result<LaunchSpec, ConsoleError>;
}

/// Resolver driven by `ConsoleConfig`
#[derive(Debug, Clone)]
pub struct ConfiguredTarget {
    mode: TargetMode,
    console_command: Vec<String>,
    docker_bin: String,
    kubectl_bin: String,
}

impl ConfiguredTarget {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            mode: config.target.clone(),
            console_command: config.console_command.clone(),
            docker_bin: config.docker_bin.clone(),
            kubectl_bin: config.kubectl_bin.clone(),
        }
    }

    fn console_args(&self) -> impl Iterator<Item = String> + '_ {
        self.console_command
            .iter()
            .cloned()
            .chain(CONSOLE_FLAGS.iter().map(|s| s.to_string()))
    }

    fn container_spec(&self, name: &str) -> LaunchSpec {
        let mut args = vec!["exec".to_string(), "-i".to_string(), name.to_string()];
        args.extend(self.console_args());
        LaunchSpec {
            program: self.docker_bin.clone(),
            args,
            remote: false,
            label: name.to_string(),
        }
    }

    fn pod_spec(
        &self,
        pod: &str,
        namespace: &str,
        context: Option<&str>,
        container: Option<&str>,
    ) -> LaunchSpec {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            pod.to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ];
        if let Some(ctx) = context {
            args.push("--context".to_string());
            args.push(ctx.to_string());
        }
        if let Some(c) = container {
            args.push("-c".to_string());
            args.push(c.to_string());
        }
        args.push("--".to_string());
        args.extend(self.console_args());
        LaunchSpec {
            program: self.kubectl_bin.clone(),
            args,
            remote: true,
            label: format!("{}/{}", namespace, pod),
        }
    }

    fn discovery_args(selector: &str, namespace: &str, context: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "get".to_string(),
            "pods".to_string(),
            "-l".to_string(),
            selector.to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ];
        if let Some(ctx) = context {
            args.push("--context".to_string());
            args.push(ctx.to_string());
        }
        args.push("--field-selector=status.phase=Running".to_string());
        args.push("-o".to_string());
        args.push("jsonpath={.items[0].metadata.name}".to_string());
        args
    }

    /// Run the discovery query once. `Ok(None)` means nothing matched.
    async fn discover_pod(
        &self,
        selector: &str,
        namespace: &str,
        context: Option<&str>,
    ) -> Result<Option<String>, ConsoleError> {
        let args = Self::discovery_args(selector, namespace, context);
        debug!(?args, "Discovering pod");

        let mut cmd = Command::new(&self.kubectl_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(DISCOVERY_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                ConsoleError::Discovery(format!("timed out after {:?}", DISCOVERY_TIMEOUT))
            })?
            .map_err(|e| ConsoleError::Spawn {
                program: self.kubectl_bin.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConsoleError::Discovery(stderr.trim().to_string()));
        }

        Ok(parse_pod_name(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl TargetResolver for ConfiguredTarget {
    async fn resolve(&self) -> Result<LaunchSpec, ConsoleError> {
        match &self.mode {
            TargetMode::Container { name } => Ok(self.container_spec(name)),
            TargetMode::Kubernetes {
                selector,
                namespace,
                context,
                container,
            } => {
                let pod = self
                    .discover_pod(selector, namespace, context.as_deref())
                    .await?
                    .ok_or_else(|| ConsoleError::Resolution {
                        selector: selector.clone(),
                        namespace: namespace.clone(),
                    })?;
                info!(pod = %pod, namespace = %namespace, "Resolved console pod");
                Ok(self.pod_spec(&pod, namespace, context.as_deref(), container.as_deref()))
            }
        }
    }
}

/// jsonpath prints an empty string when no item matched
fn parse_pod_name(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .next()
        .map(|s| s.trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
}
