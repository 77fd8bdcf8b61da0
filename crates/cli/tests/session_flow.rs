//! End-to-end tests across the agent, real tools, and the session store.
//!
//! A scripted provider stands in for the model; everything else is the
//! production wiring the `chat` command uses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codecrab_agent::{Agent, ApprovalGate, Session, ToolScheduler, TurnOutcome};
use codecrab_config::ToolsConfig;
use codecrab_core::error::ProviderError;
use codecrab_core::provider::{Provider, ProviderRequest, ProviderResponse, StopReason};
use codecrab_core::{AgentEvent, MessageToolCall, Notifier, Role, ToolCall};
use codecrab_session::{SessionStore, StoreConfig};
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted responses in order, repeating the last one forever.
struct ScriptedProvider {
    responses: Vec<ProviderResponse>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.seen.lock().unwrap().push(request);
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }
}

fn text(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.into(),
        stop_reason: StopReason::EndTurn,
        model: "mock".into(),
        ..Default::default()
    }
}

fn tool(id: &str, name: &str, args: serde_json::Value) -> ProviderResponse {
    ProviderResponse {
        tool_calls: vec![MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }],
        stop_reason: StopReason::ToolUse,
        model: "mock".into(),
        ..Default::default()
    }
}

struct Deny;

#[async_trait]
impl ApprovalGate for Deny {
    async fn approve(&self, _call: &ToolCall) -> bool {
        false
    }
}

fn session_in(dir: &std::path::Path, scheduler: ToolScheduler) -> Session {
    let tools = codecrab_tools::default_registry(&ToolsConfig::default());
    Session::new("You are a test assistant.", Arc::new(tools), Arc::new(scheduler))
        .with_model("e2e_mock", "mock")
        .with_working_dir(dir)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_write_then_resume_from_store() {
    let work = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SessionStore::open(store_dir.path(), StoreConfig::default())
            .await
            .unwrap(),
    );

    let provider = ScriptedProvider::new(vec![
        tool(
            "c1",
            "file_write",
            serde_json::json!({"path": "hello.txt", "content": "hi there"}),
        ),
        text("Wrote hello.txt."),
    ]);
    let notifier = Notifier::disabled();
    let agent = Agent::new(provider.clone(), notifier.clone())
        .with_intent_followup(false)
        .with_store(store.clone());

    let mut session = session_in(work.path(), ToolScheduler::new(notifier.clone()));
    let reply = agent.ask(&mut session, "create hello.txt").await.unwrap();

    assert_eq!(reply, "Wrote hello.txt.");
    assert_eq!(
        std::fs::read_to_string(work.path().join("hello.txt")).unwrap(),
        "hi there"
    );
    // system, human, assistant(tool call), tool, assistant
    assert_eq!(session.messages().len(), 5);
    store.shutdown().await;

    // A fresh store sees the saved session
    let reopened = SessionStore::open(store_dir.path(), StoreConfig::default())
        .await
        .unwrap();
    let listed = reopened.list_sessions(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, session.id());
    assert_eq!(listed[0].first_prompt, "create hello.txt");

    let record = reopened.load_session(session.id()).await.unwrap();
    let mut resumed = Session::from_record(
        record,
        "You are a test assistant.",
        session.tools().clone(),
        Arc::new(ToolScheduler::new(notifier.clone())),
    );
    assert_eq!(resumed.messages(), session.messages());

    let follow_up = ScriptedProvider::new(vec![text("It says hi there.")]);
    let agent = Agent::new(follow_up.clone(), notifier).with_intent_followup(false);
    agent.ask(&mut resumed, "what does it say?").await.unwrap();

    assert_eq!(resumed.history().human_count(), 2);
    let sent = follow_up.seen.lock().unwrap();
    assert_eq!(sent[0].messages.len(), 6);
    assert_eq!(sent[0].messages[0].role, Role::System);
    reopened.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn repeated_shell_call_trips_loop_detection() {
    let work = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![tool(
        "c1",
        "shell",
        serde_json::json!({"command": "echo again"}),
    )]);
    let (notifier, mut events) = Notifier::channel();
    let agent = Agent::new(provider.clone(), notifier.clone());
    let mut session = session_in(work.path(), ToolScheduler::new(notifier));

    let outcome = agent
        .run_turn(&mut session, "loop forever", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        TurnOutcome::LoopDetected { ref tool_name, .. } if tool_name == "shell"
    ));
    assert_eq!(provider.calls(), 3);

    let mut saw_loop = false;
    let mut successes = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            AgentEvent::LoopDetected { repeats, .. } => {
                saw_loop = true;
                assert_eq!(repeats, 3);
            }
            AgentEvent::Tool { call } if call.output.is_some() => successes += 1,
            _ => {}
        }
    }
    assert!(saw_loop);
    assert_eq!(successes, 2);

    // Every tool call in the history has a response
    let calls: usize = session.messages().iter().map(|m| m.tool_calls().len()).sum();
    let responses = session
        .messages()
        .iter()
        .filter(|m| m.tool_response_part().is_some())
        .count();
    assert_eq!(calls, responses);
}

#[tokio::test]
async fn denied_write_leaves_disk_untouched() {
    let work = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool(
            "c1",
            "file_write",
            serde_json::json!({"path": "nope.txt", "content": "x"}),
        ),
        text("The write was denied."),
    ]);
    let notifier = Notifier::disabled();
    let agent = Agent::new(provider, notifier.clone()).with_intent_followup(false);
    let scheduler = ToolScheduler::new(notifier).with_approval(Arc::new(Deny));
    let session = session_in(work.path(), scheduler);

    let (session, outcome) = agent
        .ask_stream(session, "write nope.txt")
        .join()
        .await
        .unwrap();

    assert_eq!(outcome.unwrap().text(), "The write was denied.");
    assert!(!work.path().join("nope.txt").exists());
    let response = session
        .messages()
        .iter()
        .find_map(|m| m.tool_response_part())
        .unwrap();
    assert_eq!(response.output, "Error: tool call denied");
}

#[tokio::test]
async fn rollback_discards_turn_before_save() {
    let work = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SessionStore::open(store_dir.path(), StoreConfig::default())
            .await
            .unwrap(),
    );
    let provider = ScriptedProvider::new(vec![text("first"), text("second")]);
    let notifier = Notifier::disabled();
    let agent = Agent::new(provider, notifier.clone())
        .with_intent_followup(false)
        .with_store(store.clone());
    let mut session = session_in(work.path(), ToolScheduler::new(notifier));

    agent.ask(&mut session, "one").await.unwrap();
    let snapshot = session.snapshot();
    agent.ask(&mut session, "two").await.unwrap();
    session.rollback_to(snapshot);
    assert!(store.save_session(&session.to_record()));
    store.shutdown().await;

    let reopened = SessionStore::open(store_dir.path(), StoreConfig::default())
        .await
        .unwrap();
    let record = reopened.load_session(session.id()).await.unwrap();
    assert_eq!(record.messages.len(), 3);
    assert_eq!(record.messages[2].text(), "first");
    reopened.shutdown().await;
}

#[tokio::test]
async fn undoing_only_prompt_removes_saved_session() {
    let work = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SessionStore::open(store_dir.path(), StoreConfig::default())
            .await
            .unwrap(),
    );
    let provider = ScriptedProvider::new(vec![text("done")]);
    let notifier = Notifier::disabled();
    let agent = Agent::new(provider, notifier.clone())
        .with_intent_followup(false)
        .with_store(store.clone());
    let mut session = session_in(work.path(), ToolScheduler::new(notifier));

    agent.ask(&mut session, "only prompt").await.unwrap();
    session.rollback_to(1);
    assert!(store.sync_session(&session.to_record()));
    store.shutdown().await;

    let reopened = SessionStore::open(store_dir.path(), StoreConfig::default())
        .await
        .unwrap();
    assert!(reopened.list_sessions(10).await.unwrap().is_empty());
    assert!(reopened.load_session(session.id()).await.is_err());
    reopened.shutdown().await;
}
