//! Tool trait, tool catalog, and the tool-call lifecycle record.
//!
//! Tools are what give the agent the ability to act: run shell commands,
//! read and write files. The model selects them by name at runtime, so the
//! catalog is a name → trait object registry built once per session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Lifecycle status of a tool call.
///
/// Allowed transitions:
/// `scheduled → (awaiting_approval →) executing → success | error | cancelled`.
/// `scheduled` and `awaiting_approval` may also go straight to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Scheduled,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        matches!(
            (self, next),
            (Scheduled, AwaitingApproval)
                | (Scheduled, Executing)
                | (Scheduled, Cancelled)
                | (AwaitingApproval, Executing)
                | (AwaitingApproval, Cancelled)
                | (Executing, Success)
                | (Executing, Error)
                | (Executing, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One requested tool invocation and where it is in its lifecycle.
///
/// `output` is only set once the call reached `success`; `error` only once
/// it reached `error` or `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Serialized JSON arguments
    pub arguments: String,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// A freshly scheduled call.
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            status: ToolCallStatus::Scheduled,
            output: None,
            error: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: ToolCallStatus) -> Result<(), ToolError> {
        if !self.status.can_transition_to(next) {
            return Err(ToolError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn succeed(&mut self, output: impl Into<String>) -> Result<(), ToolError> {
        self.transition(ToolCallStatus::Success)?;
        self.output = Some(output.into());
        Ok(())
    }

    pub fn fail(&mut self, error: &ToolError) -> Result<(), ToolError> {
        let next = match error {
            ToolError::Cancelled => ToolCallStatus::Cancelled,
            _ => ToolCallStatus::Error,
        };
        self.transition(next)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    /// The text folded back into the conversation for this call.
    pub fn response_text(&self) -> String {
        match (self.status, &self.output, &self.error) {
            (ToolCallStatus::Success, Some(out), _) => out.clone(),
            (_, _, Some(err)) => format!("Error: {err}"),
            (status, _, _) => format!("Error: tool call ended in state {}", status.as_str()),
        }
    }
}

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    /// Directory relative paths are resolved against
    pub working_dir: PathBuf,
    /// Fires when the owning turn is cancelled
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            call_id: String::new(),
            working_dir: working_dir.into(),
            cancel,
        }
    }

    pub fn for_call(&self, call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ..self.clone()
        }
    }
}

/// The core Tool trait.
///
/// Each tool (shell, file_read, file_write, ...) implements this trait and
/// is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool with the serialized JSON arguments the model produced.
    async fn call(&self, ctx: &ToolContext, arguments: &str) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tool catalog: a name → tool registry.
///
/// Tools are held behind `Arc` so the scheduler can move them onto the
/// task that executes a call.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::from(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool definitions, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
