//! Tool handler backed by a `ConsoleSession`

use std::sync::Arc;
use std::time::Duration;

use rconsole_core::ConsoleSession;
use serde_json::Value;
use tracing::{debug, warn};

use crate::server::ToolHandler;
use crate::tools::{ExecuteArgs, ToolResult, EXECUTE_TOOL};

pub struct ConsoleToolHandler {
    session: Arc<ConsoleSession>,
}

impl ConsoleToolHandler {
    pub fn new(session: Arc<ConsoleSession>) -> Self {
        Self { session }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let args: ExecuteArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if args.timeout == Some(0) {
            return ToolResult::error("timeout must be a positive number of milliseconds");
        }

        debug!(code_len = args.code.len(), timeout_ms = ?args.timeout, "execute");
        let result = self
            .session
            .execute(&args.code, args.timeout.map(Duration::from_millis))
            .await;

        if let Some(error) = &result.error {
            warn!(error = %error, "execute failed");
        }
        ToolResult::from_execution(&result)
    }
}

#[async_trait::async_trait]
impl ToolHandler for ConsoleToolHandler {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        match name {
            EXECUTE_TOOL => self.execute(arguments).await,
            _ => ToolResult::error(format!("Unknown tool: {}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rconsole_core::{ConsoleConfig, ConsoleError, LaunchSpec, TargetMode, TargetResolver};
    use serde_json::json;

    const ECHO_IRB: &str = r#"
printf 'irb(main):001:0> '
while IFS= read -r line; do
  case "$line" in
    boom) printf 'NameError: undefined local variable or method boom for main\n' ;;
    *) printf '=> %s\n' "$line" ;;
  esac
  printf 'irb(main):001:0> '
done
"#;

    struct ShellTarget;

    #[async_trait]
    impl TargetResolver for ShellTarget {
        async fn resolve(&self) -> Result<LaunchSpec, ConsoleError> {
            Ok(LaunchSpec {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), ECHO_IRB.to_string()],
                remote: false,
                label: "shell".to_string(),
            })
        }
    }

    fn handler() -> ConsoleToolHandler {
        let config = ConsoleConfig::new(TargetMode::Container { name: "web".into() });
        ConsoleToolHandler::new(Arc::new(ConsoleSession::new(config, Arc::new(ShellTarget))))
    }

    fn parse(result: &ToolResult) -> Value {
        serde_json::from_str(result.first_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_bad_arguments() {
        let h = handler();

        let result = h.call(EXECUTE_TOOL, json!({ "timeout": 10 })).await;
        assert_eq!(result.is_error, Some(true));
        assert!(parse(&result)["error"].as_str().unwrap().contains("code"));

        let result = h.call(EXECUTE_TOOL, json!({ "code": "1", "timeout": 0 })).await;
        assert_eq!(result.is_error, Some(true));

        let result = h.call("shell", json!({})).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_through_session() {
        let h = handler();

        let result = h.call(EXECUTE_TOOL, json!({ "code": "1 + 1" })).await;
        assert!(result.is_error.is_none());
        assert_eq!(parse(&result), json!({ "success": true, "output": "=> 1 + 1" }));

        let result = h.call(EXECUTE_TOOL, json!({ "code": "boom", "timeout": 5000 })).await;
        assert_eq!(result.is_error, Some(true));
        let value = parse(&result);
        assert_eq!(value["success"], false);
        assert!(value["output"].as_str().unwrap().starts_with("NameError"));

        h.session.shutdown().await;
    }
}
