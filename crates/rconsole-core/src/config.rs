//! Session configuration, read once from the environment at startup

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(7_200_000);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1_048_576;

/// Startup budget for `docker exec` into a known container
pub const CONTAINER_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
/// Startup budget for a discovered pod (discovery + exec + Rails boot over the network)
pub const KUBERNETES_STARTUP_TIMEOUT: Duration = Duration::from_secs(180);

const DEFAULT_CONSOLE_COMMAND: &str = "bundle exec rails console";

/// How the console process is located
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// `docker exec` into a container with a fixed name
    Container { name: String },
    /// Discover a running pod by label selector, then `kubectl exec` into it
    Kubernetes {
        selector: String,
        namespace: String,
        context: Option<String>,
        container: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub target: TargetMode,
    pub command_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub max_output_bytes: usize,
    /// Interpreter entry point run inside the target; `-- --nomultiline` is appended
    pub console_command: Vec<String>,
    pub docker_bin: String,
    pub kubectl_bin: String,
}

impl ConsoleConfig {
    /// Config with defaults for everything but the target
    pub fn new(target: TargetMode) -> Self {
        Self {
            target,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            console_command: split_command(DEFAULT_CONSOLE_COMMAND),
            docker_bin: "docker".to_string(),
            kubectl_bin: "kubectl".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = get("RCONSOLE_TARGET_MODE").unwrap_or_else(|| "container".to_string());
        let target = match mode.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" => TargetMode::Container {
                name: get("RCONSOLE_CONTAINER")
                    .ok_or(ConfigError::Missing("RCONSOLE_CONTAINER", "container"))?,
            },
            "kubernetes" | "k8s" => TargetMode::Kubernetes {
                selector: get("RCONSOLE_K8S_SELECTOR")
                    .ok_or(ConfigError::Missing("RCONSOLE_K8S_SELECTOR", "kubernetes"))?,
                namespace: get("RCONSOLE_K8S_NAMESPACE").unwrap_or_else(|| "default".to_string()),
                context: get("RCONSOLE_K8S_CONTEXT"),
                container: get("RCONSOLE_K8S_CONTAINER"),
            },
            _ => return Err(ConfigError::UnknownMode(mode)),
        };

        let mut config = Self::new(target);

        if let Some(ms) = parse_positive(&get, "RCONSOLE_COMMAND_TIMEOUT_MS")? {
            config.command_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_positive(&get, "RCONSOLE_INACTIVITY_TIMEOUT_MS")? {
            config.inactivity_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_positive(&get, "RCONSOLE_MAX_OUTPUT_BYTES")? {
            config.max_output_bytes = bytes as usize;
        }
        if let Some(cmd) = get("RCONSOLE_CONSOLE_COMMAND") {
            config.console_command = split_command(&cmd);
            if config.console_command.is_empty() {
                return Err(ConfigError::EmptyCommand);
            }
        }
        if let Some(bin) = get("RCONSOLE_DOCKER_BIN") {
            config.docker_bin = bin;
        }
        if let Some(bin) = get("RCONSOLE_KUBECTL_BIN") {
            config.kubectl_bin = bin;
        }

        Ok(config)
    }

    /// How long a freshly spawned console may take to show its first prompt
    pub fn startup_timeout(&self, remote: bool) -> Duration {
        if remote {
            KUBERNETES_STARTUP_TIMEOUT
        } else {
            CONTAINER_STARTUP_TIMEOUT
        }
    }
}

fn split_command(cmd: &str) -> Vec<String> {
    cmd.split_whitespace().map(str::to_string).collect()
}

fn parse_positive<G>(get: &G, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}
