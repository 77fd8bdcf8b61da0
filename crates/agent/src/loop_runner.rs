//! The agent reasoning loop implementation.
//!
//! One algorithm backs both [`Agent::ask`] (blocking) and
//! [`Agent::ask_stream`] (background task, results via notifications):
//! append the prompt, call the model, fold tool results back in, and
//! repeat until the model stops, a bound is hit, or the turn is cancelled.

use codecrab_core::{
    AgentEvent, Error, Message, MessageToolCall, Notifier, ProviderRequest, ProviderResponse,
    Provider, StopReason, ToolContext, ToolError,
};
use codecrab_session::SessionStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::loop_detector::fingerprint;
use crate::session::Session;
use crate::stream::StreamHandle;

/// How a turn ended. Only a failed model call is an `Err`; everything
/// here is a normal completion the caller can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model stopped on its own
    Completed { text: String },
    /// The same tool call repeated past the threshold
    LoopDetected { text: String, tool_name: String },
    /// The iteration bound ran out
    MaxTurns { text: String, turns: usize },
    /// The model output was truncated at its token limit
    MaxTokens { text: String },
    /// Cancelled; `partial_text` was kept in the history
    Interrupted { partial_text: String },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text }
            | Self::LoopDetected { text, .. }
            | Self::MaxTurns { text, .. }
            | Self::MaxTokens { text } => text,
            Self::Interrupted { partial_text } => partial_text,
        }
    }

    /// The text to show the user. Exhausted turns carry a notice.
    pub fn into_text(self) -> String {
        match self {
            Self::MaxTurns { text, turns } if text.is_empty() => {
                format!("[ended after {turns} iterations]")
            }
            Self::MaxTurns { text, turns } => format!("{text}\n\n[ended after {turns} iterations]"),
            Self::Completed { text }
            | Self::LoopDetected { text, .. }
            | Self::MaxTokens { text } => text,
            Self::Interrupted { partial_text } => partial_text,
        }
    }
}

/// What one model call produced.
enum Reply {
    Done(ProviderResponse),
    Interrupted(String),
}

/// Drives sessions through model and tool turns.
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn Provider>,
    notifier: Notifier,
    temperature: f32,
    max_tokens: Option<u32>,
    intent_followup: bool,
    store: Option<Arc<SessionStore>>,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, notifier: Notifier) -> Self {
        Self {
            provider,
            notifier,
            temperature: 0.7,
            max_tokens: None,
            intent_followup: true,
            store: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Whether the first text-only reply earns one more iteration.
    pub fn with_intent_followup(mut self, enabled: bool) -> Self {
        self.intent_followup = enabled;
        self
    }

    /// Persist the session after every turn.
    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run a prompt to completion and return the text to show.
    pub async fn ask(&self, session: &mut Session, prompt: &str) -> Result<String, Error> {
        let outcome = self
            .run_turn(session, prompt, &CancellationToken::new())
            .await?;
        Ok(outcome.into_text())
    }

    /// Run a prompt using blocking model calls, honouring `cancel`.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let result = self.drive(session, prompt, cancel, false).await;
        self.finish(session, result)
    }

    /// Run a prompt on a background task, streaming model output.
    ///
    /// The session moves into the task and comes back from
    /// [`StreamHandle::join`], so a new prompt cannot start until the
    /// previous one has handed it back.
    pub fn ask_stream(&self, session: Session, prompt: impl Into<String>) -> StreamHandle {
        let cancel = CancellationToken::new();
        let agent = self.clone();
        let prompt = prompt.into();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut session = session;
            let result = agent.drive(&mut session, &prompt, &token, true).await;
            let outcome = agent.finish(&session, result);
            (session, outcome)
        });

        StreamHandle::new(cancel, join)
    }

    /// Report errors and persist.
    fn finish(
        &self,
        session: &Session,
        result: Result<TurnOutcome, Error>,
    ) -> Result<TurnOutcome, Error> {
        if let Err(e) = &result {
            warn!(session_id = %session.id(), error = %e, "Turn failed");
            self.notifier.notify(AgentEvent::TurnError {
                message: e.to_string(),
            });
        }
        if let Some(store) = &self.store {
            store.save_session(&session.to_record());
        }
        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
        streaming: bool,
    ) -> Result<TurnOutcome, Error> {
        let text = session.take_prompt(prompt);
        session.push(Message::human(text));
        self.notifier.notify(AgentEvent::TurnStarted {
            prompt: prompt.to_string(),
        });
        info!(session_id = %session.id(), messages = session.messages().len(), "Processing prompt");

        let tool_definitions = session.tools().definitions();
        let max_turns = session.max_turns();
        let ctx = ToolContext::new(session.working_dir(), cancel.clone());

        let mut last_text = String::new();
        let mut text_only_turns = 0usize;
        let mut previous_text_only: Option<String> = None;

        for iteration in 1..=max_turns {
            if cancel.is_cancelled() {
                return Ok(self.interrupted(session, String::new()));
            }
            debug!(session_id = %session.id(), iteration, "Agent loop iteration");

            let request = ProviderRequest {
                model: session.model().to_string(),
                messages: session.messages().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
                stream: streaming,
            };

            let reply = if streaming {
                self.stream_reply(request, cancel).await?
            } else {
                self.complete_reply(request, cancel).await?
            };
            let response = match reply {
                Reply::Done(response) => response,
                Reply::Interrupted(partial) => return Ok(self.interrupted(session, partial)),
            };

            if let Some(reasoning) = response.reasoning.as_deref()
                && !streaming
                && !reasoning.is_empty()
            {
                self.notifier.notify(AgentEvent::ReasoningChunk {
                    text: reasoning.to_string(),
                });
            }
            if !response.text.is_empty() {
                last_text = response.text.clone();
            }

            if response.stop_reason == StopReason::MaxTokens {
                warn!(session_id = %session.id(), "Model output truncated at token limit");
                session.push(Message::assistant(response.text, vec![]));
                self.notifier.notify(AgentEvent::MaxTokensReached {
                    text: last_text.clone(),
                });
                return Ok(TurnOutcome::MaxTokens { text: last_text });
            }

            let tool_calls = response.tool_calls;
            session.push(Message::assistant(response.text.clone(), tool_calls.clone()));

            if tool_calls.is_empty() {
                text_only_turns += 1;
                let repeated = previous_text_only.as_deref() == Some(response.text.as_str());
                if !self.intent_followup
                    || text_only_turns > 1
                    || repeated
                    || iteration == max_turns
                {
                    self.notifier.notify(AgentEvent::TurnComplete {
                        text: last_text.clone(),
                    });
                    return Ok(TurnOutcome::Completed { text: last_text });
                }
                previous_text_only = Some(response.text);
                continue;
            }

            debug!(tool_count = tool_calls.len(), "Executing tool calls");
            for (idx, tc) in tool_calls.iter().enumerate() {
                if session.loop_detector.record(&fingerprint(&tc.name, &tc.arguments)) {
                    let repeats = session.loop_detector.repeats();
                    warn!(session_id = %session.id(), tool = %tc.name, repeats, "Repeated tool call detected, ending turn");
                    self.skip_calls(session, &tool_calls[idx..], "repeated tool call detected");
                    self.notifier.notify(AgentEvent::LoopDetected {
                        tool_name: tc.name.clone(),
                        repeats,
                    });
                    return Ok(TurnOutcome::LoopDetected {
                        text: last_text,
                        tool_name: tc.name.clone(),
                    });
                }

                if cancel.is_cancelled() {
                    self.skip_calls(session, &tool_calls[idx..], "turn cancelled");
                    return Ok(self.interrupted(session, String::new()));
                }

                let output = self.dispatch(session, tc, &ctx).await;
                session.push(Message::tool_response(&tc.id, &tc.name, output));
            }
        }

        warn!(session_id = %session.id(), iterations = max_turns, "Max iterations reached");
        self.notifier.notify(AgentEvent::MaxTurnsExceeded {
            turns: max_turns,
            text: last_text.clone(),
        });
        Ok(TurnOutcome::MaxTurns {
            text: last_text,
            turns: max_turns,
        })
    }

    /// Run one tool call through the scheduler and return its response text.
    async fn dispatch(&self, session: &Session, tc: &MessageToolCall, ctx: &ToolContext) -> String {
        let scheduler = session.scheduler();
        let Some(tool) = session.tools().get(&tc.name) else {
            return scheduler
                .reject(&tc.id, &tc.name, &tc.arguments, ToolError::NotFound(tc.name.clone()))
                .response_text();
        };

        match scheduler.schedule(tool, &tc.id, &tc.arguments, ctx).await {
            Ok(call) => call.response_text(),
            Err(_) => format!("Error: {} did not report a result", tc.name),
        }
    }

    /// Give each call a synthetic response so every tool-call part is
    /// answered.
    fn skip_calls(&self, session: &mut Session, calls: &[MessageToolCall], reason: &str) {
        for tc in calls {
            session.push(Message::tool_response(
                &tc.id,
                &tc.name,
                format!("Error: skipped, {reason}"),
            ));
        }
    }

    fn interrupted(&self, session: &mut Session, partial_text: String) -> TurnOutcome {
        if !partial_text.is_empty() {
            session.push(Message::assistant(partial_text.clone(), vec![]));
        }
        info!(session_id = %session.id(), partial_len = partial_text.len(), "Turn interrupted");
        self.notifier.notify(AgentEvent::TurnInterrupted {
            partial_text: partial_text.clone(),
        });
        TurnOutcome::Interrupted { partial_text }
    }

    async fn complete_reply(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Reply, Error> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(Reply::Interrupted(String::new())),
            response = self.provider.complete(request) => Ok(Reply::Done(response?)),
        }
    }

    /// Accumulate a streamed reply, forwarding chunks as they arrive.
    /// Cancellation is checked before every chunk.
    async fn stream_reply(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Reply, Error> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Ok(Reply::Interrupted(String::new())),
            rx = self.provider.stream(request) => rx?,
        };

        let mut response = ProviderResponse::default();
        let mut reasoning = String::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Reply::Interrupted(response.text)),
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                response.text.push_str(&content);
                self.notifier.notify(AgentEvent::TextChunk { text: content });
            }
            if let Some(delta) = chunk.reasoning
                && !delta.is_empty()
            {
                reasoning.push_str(&delta);
                self.notifier.notify(AgentEvent::ReasoningChunk { text: delta });
            }
            response.tool_calls.extend(chunk.tool_calls);
            if let Some(reason) = chunk.stop_reason {
                response.stop_reason = reason;
            }
            if chunk.usage.is_some() {
                response.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        if !reasoning.is_empty() {
            response.reasoning = Some(reasoning);
        }
        Ok(Reply::Done(response))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("intent_followup", &self.intent_followup)
            .field("store", &self.store.is_some())
            .finish()
    }
}
