//! File read tool: read file contents with path validation.

use async_trait::async_trait;
use codecrab_core::error::ToolError;
use codecrab_core::tool::{Tool, ToolContext};
use serde::Deserialize;

use crate::path;

#[derive(Default)]
pub struct FileReadTool {
    /// Forbidden path prefixes.
    forbidden_paths: Vec<String>,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    /// 1-based first line to return
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl FileReadTool {
    /// Create a file read tool with no path restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forbidden_paths(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Relative paths are resolved against the working directory. Use offset/limit to read a range of lines."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, ctx: &ToolContext, arguments: &str) -> Result<String, ToolError> {
        let args: ReadArgs = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("file_read: {e}")))?;
        let resolved = path::resolve("file_read", &ctx.working_dir, &args.path, &self.forbidden_paths)?;

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("Failed to read {}: {e}", args.path),
            })?;

        if args.offset.is_none() && args.limit.is_none() {
            return Ok(content);
        }

        let skip = args.offset.unwrap_or(1).saturating_sub(1);
        let take = args.limit.unwrap_or(usize::MAX);
        Ok(content
            .lines()
            .skip(skip)
            .take(take)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
