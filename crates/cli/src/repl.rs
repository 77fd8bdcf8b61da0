//! Line input and slash-command parsing for the interactive chat.

use codecrab_core::{Message, Role, Snapshot};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};

/// Shared stdin.
///
/// One background task owns stdin and forwards lines; the prompt loop and
/// the approval gate both read through this handle, never at the same
/// time since the prompt loop is parked while a turn runs.
#[derive(Clone)]
pub struct StdinLines {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl StdinLines {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            // EOF (Ctrl+D) or a read error closes the channel
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Next line, or `None` once stdin is closed.
    pub async fn next_line(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

/// A parsed line of chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Prompt(String),
    Add(String),
    Pin(String),
    Unpin(String),
    History,
    Undo,
    Edit { index: usize, text: String },
    Help,
    Exit,
    Empty,
    Invalid(String),
}

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if matches!(line, "exit" | "quit") {
        return Input::Exit;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Prompt(line.to_string());
    };

    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };

    let needs_arg = |make: fn(String) -> Input, usage: &str| {
        if arg.is_empty() {
            Input::Invalid(format!("usage: {usage}"))
        } else {
            make(arg.to_string())
        }
    };

    match cmd {
        "add" => needs_arg(Input::Add, "/add <path>"),
        "pin" => needs_arg(Input::Pin, "/pin <path>"),
        "unpin" => needs_arg(Input::Unpin, "/unpin <path>"),
        "history" => Input::History,
        "undo" => Input::Undo,
        "edit" => parse_edit(arg),
        "help" | "?" => Input::Help,
        "exit" | "quit" | "q" => Input::Exit,
        other => Input::Invalid(format!("unknown command: /{other} (try /help)")),
    }
}

fn parse_edit(arg: &str) -> Input {
    const USAGE: &str = "usage: /edit <n> <new prompt>";
    let Some((n, text)) = arg.split_once(char::is_whitespace) else {
        return Input::Invalid(USAGE.into());
    };
    match n.parse::<usize>() {
        Ok(index) if index >= 1 && !text.trim().is_empty() => Input::Edit {
            index,
            text: text.trim().to_string(),
        },
        _ => Input::Invalid(USAGE.into()),
    }
}

pub const HELP: &str = "\
  /add <path>      attach a file to the next prompt
  /pin <path>      attach a file to every prompt
  /unpin <path>    stop attaching a pinned file
  /history         list prompts in this session
  /undo            drop the last prompt and everything after it
  /edit <n> <txt>  replace prompt n and re-run from there
  /exit            quit";

/// Snapshot taken just before the `n`th human message (1-based).
pub fn before_prompt(messages: &[Message], n: usize) -> Option<Snapshot> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Human)
        .nth(n.checked_sub(1)?)
        .map(|(i, _)| i)
}

/// Snapshot taken just before the most recent human message.
pub fn before_last_prompt(messages: &[Message]) -> Option<Snapshot> {
    messages.iter().rposition(|m| m.role == Role::Human)
}

/// First line of `text`, cut to `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}...")
    }
}
