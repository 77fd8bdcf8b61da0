//! `codecrab chat`: interactive streaming chat, or a single prompt.

use async_trait::async_trait;
use codecrab_agent::{Agent, ApprovalGate, Session, ToolScheduler, TurnOutcome};
use codecrab_config::{AppConfig, ApprovalMode};
use codecrab_core::{AgentEvent, Role, ToolCall, ToolCallStatus};
use codecrab_session::SessionStore;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::repl::{self, Input, StdinLines};

const DEFAULT_SYSTEM_PROMPT: &str = "You are codecrab, a coding assistant working in the user's \
project directory. Use the shell, file_read, and file_write tools to inspect and change files. \
Read before you edit, keep changes minimal, and say what you changed.";

pub struct ChatOptions {
    pub message: Option<String>,
    pub resume: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub async fn run(opts: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate()?;

    let store = Arc::new(super::open_store(&config).await?);
    let resumed = match &opts.resume {
        Some(id) => Some(store.load_session(id).await?),
        None => None,
    };

    let router = codecrab_providers::build_from_config(&config);
    let provider_name = opts
        .provider
        .as_deref()
        .or(resumed.as_ref().map(|r| r.provider.as_str()).filter(|p| !p.is_empty()));
    let model_name = opts
        .model
        .as_deref()
        .or(resumed.as_ref().map(|r| r.model.as_str()).filter(|m| !m.is_empty()));
    let (provider, model) = router.select(provider_name, model_name)?;

    let has_key = config.has_api_key()
        || config
            .providers
            .get(provider.name())
            .is_some_and(|p| p.api_key.is_some());
    if !has_key && provider.name() != "ollama" {
        eprintln!();
        eprintln!("  No API key configured for '{}'.", provider.name());
        eprintln!("  Set CODECRAB_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add api_key to {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found".into());
    }

    let input = StdinLines::spawn();
    let (notifier, mut events) = codecrab_core::Notifier::channel();

    let mut scheduler = ToolScheduler::new(notifier.clone());
    if let Some(timeout) = config.agent.tool_timeout() {
        scheduler = scheduler.with_timeout(timeout);
    }
    if config.agent.approval == ApprovalMode::Prompt {
        scheduler = scheduler.with_approval(Arc::new(StdinApproval {
            input: input.clone(),
        }));
    }
    let scheduler = Arc::new(scheduler);
    let tools = Arc::new(codecrab_tools::default_registry(&config.tools));
    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    let session = match resumed {
        Some(record) => Session::from_record(record, system_prompt, tools, scheduler),
        None => Session::new(system_prompt, tools, scheduler)
            .with_working_dir(std::env::current_dir()?),
    }
    .with_model(provider.name(), &model)
    .with_max_turns(config.agent.max_turns)
    .with_loop_threshold(config.agent.loop_threshold);

    let agent = Agent::new(provider, notifier)
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_intent_followup(config.agent.intent_followup)
        .with_store(store.clone());

    info!(session_id = %session.id(), model = %model, "Chat session ready");

    let result = match opts.message {
        Some(message) => run_prompt(&agent, session, message, &mut events)
            .await
            .map(|_| ()),
        None => interactive(&agent, &store, session, &input, &mut events).await,
    };

    store.shutdown().await;
    result
}

async fn interactive(
    agent: &Agent,
    store: &SessionStore,
    mut session: Session,
    input: &StdinLines,
    events: &mut UnboundedReceiver<AgentEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("  codecrab — {} via {}", session.model(), session.provider());
    println!("  Session:  {}", session.id());
    println!("  Workdir:  {}", session.working_dir().display());
    if session.history().human_count() > 0 {
        println!(
            "  Resumed:  {} prompts so far",
            session.history().human_count()
        );
    }
    println!("  Type /help for commands. Ctrl+C cancels a running turn, Ctrl+D quits.");
    println!();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = input.next_line().await else {
            break;
        };

        match repl::parse(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Help => println!("{}", repl::HELP),
            Input::Invalid(msg) => eprintln!("  {msg}"),
            Input::Prompt(text) => {
                session = run_prompt(agent, session, text, events).await?;
            }
            Input::Add(path) => match read_context_file(session.working_dir(), &path).await {
                Ok(content) => {
                    session.add_context_file(&path, content);
                    println!("  Attached {path} to the next prompt");
                }
                Err(e) => eprintln!("  Cannot read {path}: {e}"),
            },
            Input::Pin(path) => match read_context_file(session.working_dir(), &path).await {
                Ok(content) => {
                    session.pin_context_file(&path, content);
                    println!("  Pinned {path}");
                }
                Err(e) => eprintln!("  Cannot read {path}: {e}"),
            },
            Input::Unpin(path) => {
                if session.unpin_context_file(&path) {
                    println!("  Unpinned {path}");
                } else {
                    eprintln!("  {path} is not pinned");
                }
            }
            Input::History => print_history(&session),
            Input::Undo => match repl::before_last_prompt(session.messages()) {
                Some(snapshot) => {
                    session.rollback_to(snapshot);
                    store.sync_session(&session.to_record());
                    println!("  Dropped the last prompt and its replies");
                }
                None => eprintln!("  Nothing to undo"),
            },
            Input::Edit { index, text } => match repl::before_prompt(session.messages(), index) {
                Some(snapshot) => {
                    session.rollback_to(snapshot);
                    session = run_prompt(agent, session, text, events).await?;
                }
                None => eprintln!("  No prompt #{index} (see /history)"),
            },
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Stream one prompt, rendering events until the turn hands the session
/// back. Ctrl+C cancels the turn; partial output stays in the history.
async fn run_prompt(
    agent: &Agent,
    session: Session,
    prompt: String,
    events: &mut UnboundedReceiver<AgentEvent>,
) -> Result<Session, Box<dyn std::error::Error>> {
    let handle = agent.ask_stream(session, prompt);
    let cancel = handle.cancellation_token();
    let join = handle.join();
    tokio::pin!(join);

    println!();
    let joined = loop {
        tokio::select! {
            Some(event) = events.recv() => render(&event),
            joined = &mut join => break joined,
            Ok(()) = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                eprintln!("\n  [cancelling...]");
                cancel.cancel();
            }
        }
    };
    // Everything emitted before the task ended is already queued
    while let Ok(event) = events.try_recv() {
        render(&event);
    }
    println!();

    let (session, outcome) = joined?;
    match outcome {
        Ok(TurnOutcome::MaxTurns { turns, .. }) => {
            eprintln!("  [stopped after {turns} iterations]");
        }
        Ok(_) => {}
        Err(e) => eprintln!("  [Error] {e}"),
    }
    Ok(session)
}

fn render(event: &AgentEvent) {
    match event {
        AgentEvent::TextChunk { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ReasoningChunk { text } => {
            eprint!("{text}");
        }
        AgentEvent::Tool { call } => render_tool(call),
        AgentEvent::TurnInterrupted { .. } => eprintln!("\n  [interrupted]"),
        AgentEvent::MaxTokensReached { .. } => eprintln!("\n  [output truncated at the token limit]"),
        AgentEvent::LoopDetected { tool_name, repeats } => {
            eprintln!("\n  [stopped: {tool_name} was called {repeats} times with the same arguments]")
        }
        AgentEvent::TurnStarted { .. }
        | AgentEvent::TurnComplete { .. }
        | AgentEvent::TurnError { .. }
        | AgentEvent::MaxTurnsExceeded { .. } => {}
    }
}

fn render_tool(call: &ToolCall) {
    match call.status {
        ToolCallStatus::Executing => {
            eprintln!("\n  → {} {}", call.name, repl::preview(&call.arguments, 80));
        }
        ToolCallStatus::Error | ToolCallStatus::Cancelled => {
            eprintln!(
                "  ✗ {}: {}",
                call.name,
                repl::preview(call.error.as_deref().unwrap_or(call.status.as_str()), 120)
            );
        }
        ToolCallStatus::Success | ToolCallStatus::Scheduled | ToolCallStatus::AwaitingApproval => {}
    }
}

fn print_history(session: &Session) {
    let mut n = 0;
    for message in session.messages() {
        match message.role {
            Role::Human => {
                n += 1;
                println!("  {n:>3}. {}", repl::preview(&message.text(), 70));
            }
            Role::Assistant if !message.text().is_empty() => {
                println!("       ↳ {}", repl::preview(&message.text(), 66));
            }
            _ => {}
        }
    }
    if n == 0 {
        println!("  (no prompts yet)");
    }
    let pinned: Vec<&str> = session.pinned_files().keys().map(String::as_str).collect();
    if !pinned.is_empty() {
        println!("  Pinned: {}", pinned.join(", "));
    }
}

async fn read_context_file(working_dir: &Path, path: &str) -> std::io::Result<String> {
    tokio::fs::read_to_string(working_dir.join(path)).await
}

/// Asks on the terminal before each tool call.
struct StdinApproval {
    input: StdinLines,
}

#[async_trait]
impl ApprovalGate for StdinApproval {
    async fn approve(&self, call: &ToolCall) -> bool {
        eprint!(
            "\n  Allow {} {}? [y/N] ",
            call.name,
            repl::preview(&call.arguments, 100)
        );
        let _ = std::io::stderr().flush();
        match self.input.next_line().await {
            Some(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            None => {
                warn!(tool = %call.name, "stdin closed, denying tool call");
                false
            }
        }
    }
}

