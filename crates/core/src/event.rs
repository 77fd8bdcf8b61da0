//! Agent notifications: the single outbound stream consumed by the
//! presentation layer.
//!
//! Every observable step of a turn (text chunks, tool lifecycle
//! transitions, how the turn ended) is delivered as an [`AgentEvent`]
//! through a [`Notifier`]. Delivery is ordered and never blocks the sender.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::tool::{ToolCall, ToolCallStatus};

/// Events emitted while an agent turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A prompt was accepted and the loop started
    TurnStarted { prompt: String },

    /// Incremental model text, in production order
    TextChunk { text: String },

    /// Incremental reasoning text, for models that expose it
    ReasoningChunk { text: String },

    /// The turn ended naturally
    TurnComplete { text: String },

    /// The turn was cancelled; `partial_text` was committed to history
    TurnInterrupted { partial_text: String },

    /// The model call failed
    TurnError { message: String },

    /// The iteration bound was exhausted
    MaxTurnsExceeded { turns: usize, text: String },

    /// The model output was truncated at its token limit
    MaxTokensReached { text: String },

    /// The same tool call repeated past the threshold
    LoopDetected { tool_name: String, repeats: usize },

    /// A tool call changed status
    Tool { call: ToolCall },
}

impl AgentEvent {
    /// Stable, dotted-free name for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::TextChunk { .. } => "text_chunk",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::TurnComplete { .. } => "turn_complete",
            Self::TurnInterrupted { .. } => "turn_interrupted",
            Self::TurnError { .. } => "turn_error",
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::MaxTokensReached { .. } => "max_tokens_reached",
            Self::LoopDetected { .. } => "loop_detected",
            Self::Tool { call } => match call.status {
                ToolCallStatus::Scheduled => "tool_scheduled",
                ToolCallStatus::AwaitingApproval => "tool_awaiting_approval",
                ToolCallStatus::Executing => "tool_executing",
                ToolCallStatus::Success => "tool_success",
                ToolCallStatus::Error => "tool_error",
                ToolCallStatus::Cancelled => "tool_cancelled",
            },
        }
    }

    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TurnComplete { .. }
                | Self::TurnInterrupted { .. }
                | Self::TurnError { .. }
                | Self::MaxTurnsExceeded { .. }
                | Self::MaxTokensReached { .. }
                | Self::LoopDetected { .. }
        )
    }
}

/// The injected notification callback.
///
/// Backed by an unbounded channel so `notify` never blocks or awaits,
/// which keeps per-call ordering intact across tasks: whoever emits first
/// is received first. A disabled notifier drops everything.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl Notifier {
    /// Create a notifier and the receiver the front end drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier with no consumer.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone = front end shut down, nothing to tell
            let _ = tx.send(event);
        }
    }
}
