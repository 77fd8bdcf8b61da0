//! # codecrab core
//!
//! Domain types, traits, and error definitions for the codecrab
//! coding-assistant runtime. Everything the agent orchestration layer
//! talks to is defined here as a trait or a plain value type:
//!
//! - [`Message`] / [`MessageHistory`] - the role-tagged conversation with
//!   snapshot and rollback
//! - [`Provider`] - the opaque model client
//! - [`Tool`] / [`ToolRegistry`] - the runtime tool catalog
//! - [`ToolCall`] - one tool invocation and its lifecycle status
//! - [`AgentEvent`] / [`Notifier`] - the notification stream consumed by
//!   the presentation layer
//!
//! Implementations live in their respective crates and depend inward on
//! this one.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, SessionError, ToolError};
pub use event::{AgentEvent, Notifier};
pub use message::{Message, MessageHistory, MessageToolCall, Part, Role, Snapshot, ToolResponse};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, StopReason, StreamChunk, ToolDefinition, Usage,
};
pub use tool::{Tool, ToolCall, ToolCallStatus, ToolContext, ToolRegistry};
