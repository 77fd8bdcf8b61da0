//! Message and MessageHistory domain types.
//!
//! A message is one turn-unit of the conversation: a role plus an ordered
//! list of parts. The history is append-only except for [`MessageHistory::rollback_to`],
//! and its first message is always the system message.

use serde::{Deserialize, Serialize};

/// An index into the message history, equal to its length at the moment
/// it was taken.
pub type Snapshot = usize;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    Human,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string, exactly as the model produced them
    pub arguments: String,
}

/// The response to a tool call, folded back into the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub call_id: String,
    pub name: String,
    pub output: String,
}

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall(MessageToolCall),
    ToolResponse(ToolResponse),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message
    pub role: Role,

    /// Ordered content parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Create a new human message.
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Create an assistant message holding any produced text followed by
    /// the requested tool calls. Empty text is not recorded as a part.
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        let text = text.into();
        let mut parts = Vec::with_capacity(tool_calls.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text { text });
        }
        parts.extend(tool_calls.into_iter().map(Part::ToolCall));
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    /// Create a tool message holding exactly one response part.
    pub fn tool_response(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolResponse(ToolResponse {
                call_id: call_id.into(),
                name: name.into(),
                output: output.into(),
            })],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls requested by this message, in order.
    pub fn tool_calls(&self) -> Vec<&MessageToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// The tool response carried by this message, if any.
    pub fn tool_response_part(&self) -> Option<&ToolResponse> {
        self.parts.iter().find_map(|p| match p {
            Part::ToolResponse(resp) => Some(resp),
            _ => None,
        })
    }

    pub fn is_human(&self) -> bool {
        self.role == Role::Human
    }
}

/// The ordered conversation of a session.
///
/// Invariant: `messages[0]` is a system message for the lifetime of the
/// history. No operation removes or reorders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    /// Start a history with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Rebuild a history from persisted messages.
    ///
    /// If the first message is not a system message, one is inserted from
    /// `system_prompt` so the invariant holds.
    pub fn from_messages(mut messages: Vec<Message>, system_prompt: impl Into<String>) -> Self {
        if messages.first().map(|m| m.role) != Some(Role::System) {
            messages.insert(0, Message::system(system_prompt));
        }
        Self { messages }
    }

    /// Append a message. A system message can only ever be the first one,
    /// so later system messages are recorded as-is but never displace it.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Never true: the system message is always present.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Checkpoint the current position.
    pub fn snapshot(&self) -> Snapshot {
        self.messages.len()
    }

    /// Truncate to `max(snapshot, 1)`. The system message survives every
    /// rollback, including one to snapshot 0. Snapshots beyond the current
    /// length leave the history untouched.
    pub fn rollback_to(&mut self, snapshot: Snapshot) {
        self.messages.truncate(snapshot.max(1));
    }

    /// Number of human-authored messages.
    pub fn human_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_human()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "shell".into(),
            arguments: r#"{"command":"ls"}"#.into(),
        }
    }

    #[test]
    fn create_human_message() {
        let msg = Message::human("Hello, agent!");
        assert_eq!(msg.role, Role::Human);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn assistant_message_orders_text_before_calls() {
        let msg = Message::assistant("Let me look.", vec![call("a"), call("b")]);
        assert_eq!(msg.parts.len(), 3);
        assert!(matches!(msg.parts[0], Part::Text { .. }));
        let ids: Vec<_> = msg.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn assistant_message_skips_empty_text() {
        let msg = Message::assistant("", vec![call("a")]);
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn part_serialization_is_tagged() {
        let msg = Message::tool_response("call_1", "shell", "ok");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"tool""#));
        assert!(json.contains(r#""type":"tool_response""#));
        assert!(json.contains(r#""callId":"call_1""#));

        let msg = Message::assistant("", vec![call("x")]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""arguments":"{\"command\":\"ls\"}""#));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant("thinking", vec![call("c1")]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn human_role_serializes_as_human() {
        let json = serde_json::to_string(&Role::Human).unwrap();
        assert_eq!(json, r#""human""#);
    }

    #[test]
    fn snapshot_tracks_length() {
        let mut history = MessageHistory::new("sys");
        assert_eq!(history.snapshot(), 1);
        history.push(Message::human("a"));
        history.push(Message::assistant("b", vec![]));
        assert_eq!(history.snapshot(), 3);
    }

    #[test]
    fn rollback_keeps_system_message() {
        let mut history = MessageHistory::new("sys");
        history.push(Message::human("a"));
        history.push(Message::human("b"));

        history.rollback_to(0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::System);

        history.push(Message::human("c"));
        history.rollback_to(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].text(), "sys");
    }

    #[test]
    fn rollback_preserves_prefix() {
        let mut history = MessageHistory::new("sys");
        history.push(Message::human("first"));
        let snap = history.snapshot();
        let before: Vec<Message> = history.messages().to_vec();

        history.push(Message::assistant("reply", vec![]));
        history.push(Message::human("second"));
        history.rollback_to(snap);

        assert_eq!(history.messages(), before.as_slice());
    }

    #[test]
    fn rollback_past_end_is_noop() {
        let mut history = MessageHistory::new("sys");
        history.push(Message::human("a"));
        history.rollback_to(99);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn from_messages_inserts_missing_system() {
        let history = MessageHistory::from_messages(vec![Message::human("hi")], "sys");
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, Role::System);

        let history =
            MessageHistory::from_messages(vec![Message::system("kept"), Message::human("hi")], "sys");
        assert_eq!(history.messages()[0].text(), "kept");
        assert_eq!(history.human_count(), 1);
    }
}
