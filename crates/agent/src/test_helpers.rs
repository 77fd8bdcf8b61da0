//! Shared test helpers: scripted providers and small tools.

use async_trait::async_trait;
use codecrab_core::provider::ChunkReceiver;
use codecrab_core::{
    AgentEvent, MessageToolCall, Provider, ProviderError, ProviderRequest, ProviderResponse,
    StopReason, StreamChunk, Tool, ToolContext, ToolError, Usage,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call returns the next response. Once the script is used up it
/// either repeats the last response or fails, depending on construction.
/// `stream()` splits the text into word chunks and puts tool calls and the
/// stop reason on the final chunk.
pub struct ScriptedProvider {
    responses: Vec<ProviderResponse>,
    repeat_last: bool,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses,
            repeat_last: false,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Keep returning `response` forever.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(n) {
            Some(r) => Ok(r.clone()),
            None if self.repeat_last && !self.responses.is_empty() => {
                Ok(self.responses[self.responses.len() - 1].clone())
            }
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted after {} responses", self.responses.len()),
            }),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.next(request)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.next(request)?;
        let words: Vec<String> = response
            .text
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let (tx, rx) = mpsc::channel(words.len() + 1);
        for word in words {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(word),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                tool_calls: response.tool_calls,
                done: true,
                stop_reason: Some(response.stop_reason),
                usage: response.usage,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }
}

/// Streams `prefix` and then never finishes until the receiver is dropped.
/// `complete()` never returns.
pub struct HangingProvider {
    pub prefix: Vec<String>,
}

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = mpsc::channel(self.prefix.len() + 1);
        let prefix = self.prefix.clone();
        tokio::spawn(async move {
            for part in prefix {
                if tx
                    .send(Ok(StreamChunk {
                        content: Some(part),
                        ..Default::default()
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            tx.closed().await;
        });
        Ok(rx)
    }
}

/// Always fails.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.into(),
        stop_reason: StopReason::EndTurn,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        ..Default::default()
    }
}

/// Create a response with tool calls and optional thought text.
pub fn tool_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        tool_calls,
        stop_reason: StopReason::ToolUse,
        ..text_response(thought)
    }
}

/// A truncated response.
pub fn max_tokens_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        stop_reason: StopReason::MaxTokens,
        ..text_response(text)
    }
}

/// Helper to create a tool call.
pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Every event currently queued.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Echoes the `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }
    async fn call(&self, _ctx: &ToolContext, arguments: &str) -> Result<String, ToolError> {
        let args: serde_json::Value = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(args["text"].as_str().unwrap_or("").to_string())
    }
}

/// Counts invocations.
#[derive(Default)]
pub struct CountingTool {
    pub calls: std::sync::Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "count"
    }
    fn description(&self) -> &str {
        "Counts how often it is called"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn call(&self, _ctx: &ToolContext, _arguments: &str) -> Result<String, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("call #{n}"))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn call(&self, _ctx: &ToolContext, _arguments: &str) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Sleeps for an hour.
pub struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    fn name(&self) -> &str {
        "sleepy"
    }
    fn description(&self) -> &str {
        "Takes a long time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn call(&self, _ctx: &ToolContext, _arguments: &str) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("finally".into())
    }
}
