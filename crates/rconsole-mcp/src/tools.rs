//! MCP tool catalogue
//!
//! A single tool, `execute`, backed by the console session.

use rconsole_core::ExecutionResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EXECUTE_TOOL: &str = "execute";

/// Tool definition following the MCP schema
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Tool-level failure (bad arguments, unknown tool)
    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text {
                text: json!({ "error": message.into() }).to_string(),
            }],
            is_error: Some(true),
        }
    }

    /// Console result as `{success, output, error?}` JSON text; flagged as an
    /// error whenever the command did not succeed
    pub fn from_execution(result: &ExecutionResult) -> Self {
        let text = serde_json::to_string(result).unwrap_or_else(|e| {
            json!({ "success": false, "output": "", "error": e.to_string() }).to_string()
        });
        ToolResult {
            content: vec![ToolContent::Text { text }],
            is_error: (!result.success).then_some(true),
        }
    }

    /// Text of the first content block
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|c| match c {
            ToolContent::Text { text } => text.as_str(),
        })
    }
}

/// Arguments of the `execute` tool
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteArgs {
    pub code: String,
    /// Per-call timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

pub fn all_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        EXECUTE_TOOL,
        "Execute Ruby code in a persistent Rails console session and return the console output. \
         Variables and other state persist between calls. Output is the text IRB prints \
         (e.g. `=> 42`); exceptions are reported with success=false.",
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Ruby code to evaluate in the Rails console"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Timeout in milliseconds for this call (default from RCONSOLE_COMMAND_TIMEOUT_MS, 60000)"
                }
            },
            "required": ["code"]
        }),
    )]
}

pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}
