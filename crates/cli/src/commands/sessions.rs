//! `codecrab sessions`: inspect and prune saved sessions.

use codecrab_config::AppConfig;
use codecrab_core::{Part, Role};

use crate::repl;

pub async fn list(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config).await?;
    let sessions = store.list_sessions(limit).await?;
    store.shutdown().await;

    if sessions.is_empty() {
        println!("No saved sessions in {}", store.root().display());
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:>4}  {:<24}  FIRST PROMPT",
        "ID", "UPDATED", "MSGS", "MODEL"
    );
    for entry in sessions {
        println!(
            "{:<36}  {:<16}  {:>4}  {:<24}  {}",
            entry.id,
            entry.last_updated.format("%Y-%m-%d %H:%M"),
            entry.message_count,
            repl::preview(&entry.model, 24),
            repl::preview(&entry.first_prompt, 60),
        );
    }
    Ok(())
}

pub async fn show(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config).await?;
    let record = store.load_session(id).await;
    store.shutdown().await;
    let record = record?;

    println!("Session   {}", record.id);
    println!("Created   {}", record.created_at.to_rfc3339());
    println!("Updated   {}", record.last_updated.to_rfc3339());
    println!("Model     {} ({})", record.model, record.provider);
    println!("Workdir   {}", record.working_dir.display());
    if !record.context_files.is_empty() {
        let pinned: Vec<&str> = record.context_files.keys().map(String::as_str).collect();
        println!("Pinned    {}", pinned.join(", "));
    }
    println!();

    for message in record.messages.iter().filter(|m| m.role != Role::System) {
        for part in &message.parts {
            match (message.role, part) {
                (Role::Human, Part::Text { text }) => println!("> {}", repl::preview(text, 100)),
                (_, Part::Text { text }) => println!("  {}", repl::preview(text, 100)),
                (_, Part::ToolCall(call)) => {
                    println!("  → {} {}", call.name, repl::preview(&call.arguments, 80))
                }
                (_, Part::ToolResponse(resp)) => {
                    println!("    = {}", repl::preview(&resp.output, 80))
                }
            }
        }
    }
    Ok(())
}

pub async fn delete(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config).await?;
    let removed = store.delete_session(id).await;
    store.shutdown().await;

    if removed? {
        println!("Deleted session {id}");
    } else {
        println!("No session {id}");
    }
    Ok(())
}

pub async fn cleanup() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = super::open_store(&config).await?;
    // Opening runs the eviction; a second pass only catches sessions that
    // aged out since
    let removed = store
        .cleanup_old_sessions()
        .await
        .map(|n| n + store.evicted_on_open());
    let remaining = store.list_sessions(usize::MAX).await;
    store.shutdown().await;

    println!(
        "Removed {} sessions; {} kept (max {}, max age {} days)",
        removed?,
        remaining?.len(),
        config.sessions.max_sessions,
        config.sessions.max_age_days
    );
    Ok(())
}
