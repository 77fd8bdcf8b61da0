//! Tool-call scheduler.
//!
//! [`ToolScheduler::schedule`] marks a call `scheduled` and notifies
//! synchronously, then runs it on its own task:
//! `scheduled → (awaiting_approval →) executing → success | error | cancelled`.
//! Every transition is emitted through the [`Notifier`], and the finished
//! [`ToolCall`] is delivered exactly once on the returned oneshot channel.
//!
//! The scheduler never serializes calls itself. Callers that want
//! parallel execution can schedule several calls before awaiting any.

use async_trait::async_trait;
use codecrab_core::{AgentEvent, Notifier, Tool, ToolCall, ToolCallStatus, ToolContext, ToolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Decides whether a tool call may run.
///
/// Consulted after the call reaches `awaiting_approval`. A denied call
/// ends `cancelled`.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, call: &ToolCall) -> bool;
}

/// Runs tool calls and reports their lifecycle.
pub struct ToolScheduler {
    notifier: Notifier,
    timeout: Option<Duration>,
    approval: Option<Arc<dyn ApprovalGate>>,
}

impl ToolScheduler {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            timeout: None,
            approval: None,
        }
    }

    /// Bound each tool call. Expired calls end `error`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require approval before each call executes.
    pub fn with_approval(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval = Some(gate);
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Schedule one call. The receiver yields the call in a terminal state.
    pub fn schedule(
        &self,
        tool: Arc<dyn Tool>,
        call_id: impl Into<String>,
        arguments: impl Into<String>,
        ctx: &ToolContext,
    ) -> oneshot::Receiver<ToolCall> {
        let call = ToolCall::new(call_id, tool.name(), arguments);
        emit(&self.notifier, &call);

        let (tx, rx) = oneshot::channel();
        let ctx = ctx.for_call(call.call_id.clone());
        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        let approval = self.approval.clone();

        tokio::spawn(async move {
            let call = run_call(call, tool, ctx, notifier, timeout, approval).await;
            // Caller gave up waiting; the call still finished and was reported
            let _ = tx.send(call);
        });
        rx
    }

    /// Fail a call that can never run, e.g. an unknown tool name.
    ///
    /// The call goes straight to `error` with a single notification.
    pub fn reject(
        &self,
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
        error: ToolError,
    ) -> ToolCall {
        let call = ToolCall {
            status: ToolCallStatus::Error,
            error: Some(error.to_string()),
            ..ToolCall::new(call_id, name, arguments)
        };
        warn!(tool = %call.name, call_id = %call.call_id, error = %error, "Tool call rejected");
        emit(&self.notifier, &call);
        call
    }
}

impl std::fmt::Debug for ToolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolScheduler")
            .field("timeout", &self.timeout)
            .field("approval", &self.approval.is_some())
            .finish()
    }
}

fn emit(notifier: &Notifier, call: &ToolCall) {
    debug!(tool = %call.name, call_id = %call.call_id, status = call.status.as_str(), "Tool call transition");
    notifier.notify(AgentEvent::Tool { call: call.clone() });
}

/// Apply a transition and report it. Transitions here are fixed by
/// construction, so a rejected one only gets logged.
fn advance(notifier: &Notifier, call: &mut ToolCall, next: ToolCallStatus) -> bool {
    match call.transition(next) {
        Ok(()) => {
            emit(notifier, call);
            true
        }
        Err(e) => {
            warn!(tool = %call.name, call_id = %call.call_id, error = %e, "Dropped tool call transition");
            false
        }
    }
}

fn finish(notifier: &Notifier, call: &mut ToolCall, result: Result<String, ToolError>) {
    let applied = match result {
        Ok(output) => call.succeed(output),
        Err(err) => call.fail(&err),
    };
    match applied {
        Ok(()) => emit(notifier, call),
        Err(e) => warn!(tool = %call.name, call_id = %call.call_id, error = %e, "Dropped tool call result"),
    }
}

async fn run_call(
    mut call: ToolCall,
    tool: Arc<dyn Tool>,
    ctx: ToolContext,
    notifier: Notifier,
    timeout: Option<Duration>,
    approval: Option<Arc<dyn ApprovalGate>>,
) -> ToolCall {
    if let Some(gate) = approval {
        advance(&notifier, &mut call, ToolCallStatus::AwaitingApproval);
        let approved = tokio::select! {
            _ = ctx.cancel.cancelled() => false,
            approved = gate.approve(&call) => approved,
        };
        if !approved {
            match call.transition(ToolCallStatus::Cancelled) {
                Ok(()) => {
                    call.error = Some(if ctx.cancel.is_cancelled() {
                        ToolError::Cancelled.to_string()
                    } else {
                        "tool call denied".to_string()
                    });
                    emit(&notifier, &call);
                }
                Err(e) => warn!(tool = %call.name, error = %e, "Dropped tool call transition"),
            }
            return call;
        }
    } else if ctx.cancel.is_cancelled() {
        finish(&notifier, &mut call, Err(ToolError::Cancelled));
        return call;
    }

    advance(&notifier, &mut call, ToolCallStatus::Executing);

    let arguments = if call.arguments.trim().is_empty() {
        "{}".to_string()
    } else {
        call.arguments.clone()
    };
    if let Err(e) = serde_json::from_str::<serde_json::Value>(&arguments) {
        finish(
            &notifier,
            &mut call,
            Err(ToolError::InvalidArguments(e.to_string())),
        );
        return call;
    }

    let invoke = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.call(&ctx, &arguments)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: limit.as_secs(),
                }),
            },
            None => tool.call(&ctx, &arguments).await,
        }
    };

    let result = tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
        result = invoke => result,
    };

    if let Err(e) = &result {
        debug!(tool = %call.name, call_id = %call.call_id, error = %e, "Tool call failed");
    }
    finish(&notifier, &mut call, result);
    call
}
