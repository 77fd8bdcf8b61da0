//! Built-in tool implementations for codecrab.
//!
//! Tools give the agent the ability to act on the working tree:
//! run shell commands and read or write files. Every tool receives the
//! turn's working directory and cancellation token through
//! [`ToolContext`](codecrab_core::ToolContext).

pub mod file_read;
pub mod file_write;
pub mod path;
pub mod shell;

use codecrab_config::ToolsConfig;
use codecrab_core::tool::ToolRegistry;
use std::time::Duration;

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use shell::ShellTool;

/// Create a tool registry with all built-in tools, restricted by config.
///
/// - Shell: `allowed_commands` (empty allows everything) and
///   `shell_timeout_secs`
/// - File read/write: `forbidden_paths` (~/.ssh, /etc, ... by default)
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        ShellTool::new(config.allowed_commands.clone())
            .with_timeout(Duration::from_secs(config.shell_timeout_secs)),
    ));
    registry.register(Box::new(FileReadTool::with_forbidden_paths(
        config.forbidden_paths.clone(),
    )));
    registry.register(Box::new(FileWriteTool::with_forbidden_paths(
        config.forbidden_paths.clone(),
    )));
    registry
}
