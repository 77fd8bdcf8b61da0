//! File write tool: write or create files with path validation.

use async_trait::async_trait;
use codecrab_core::error::ToolError;
use codecrab_core::tool::{Tool, ToolContext};
use serde::Deserialize;
use tracing::debug;

use crate::path;

#[derive(Default)]
pub struct FileWriteTool {
    /// Forbidden path prefixes.
    forbidden_paths: Vec<String>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

impl FileWriteTool {
    /// Create a file write tool with no path restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forbidden_paths(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and parent directories if needed, overwrites if it exists. Relative paths are resolved against the working directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, ctx: &ToolContext, arguments: &str) -> Result<String, ToolError> {
        let args: WriteArgs = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("file_write: {e}")))?;
        let resolved =
            path::resolve("file_write", &ctx.working_dir, &args.path, &self.forbidden_paths)?;

        let failed = |what: &str, e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "file_write".into(),
            reason: format!("{what}: {e}"),
        };

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed("Failed to create directory", e))?;
        }

        tokio::fs::write(&resolved, &args.content)
            .await
            .map_err(|e| failed("Failed to write file", e))?;

        debug!(call_id = %ctx.call_id, path = %resolved.display(), bytes = args.content.len(), "Wrote file");
        Ok(format!(
            "Successfully wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
    }
}
