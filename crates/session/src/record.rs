//! On-disk session formats.
//!
//! `session-<id>/session.json` holds a full [`SessionRecord`];
//! `index.json` holds one [`IndexEntry`] per record so listings never
//! load message bodies. Field names are camelCase on disk.

use chrono::{DateTime, Utc};
use codecrab_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Longest first-prompt summary kept in the index, in characters.
pub const FIRST_PROMPT_MAX_CHARS: usize = 100;

/// The durable projection of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub first_prompt: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Pinned context files, path → content
    #[serde(default)]
    pub context_files: BTreeMap<String, String>,
}

impl SessionRecord {
    pub fn human_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_human()).count()
    }
}

/// One row of `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub first_prompt: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub working_dir: PathBuf,
}

impl From<&SessionRecord> for IndexEntry {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            last_updated: record.last_updated,
            first_prompt: record.first_prompt.clone(),
            message_count: record.messages.len(),
            model: record.model.clone(),
            provider: record.provider.clone(),
            working_dir: record.working_dir.clone(),
        }
    }
}

/// The whole of `index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default)]
    pub sessions: Vec<IndexEntry>,
}

impl SessionIndex {
    /// Insert or replace the entry with the same id.
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self.sessions.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.sessions.push(entry),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|e| e.id != id);
        self.sessions.len() < before
    }

    /// Most recently updated first.
    pub fn sort_newest_first(&mut self) {
        self.sessions
            .sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    }
}

/// Collapse a prompt onto one line and cap it for the index.
pub fn summarize_prompt(prompt: &str) -> String {
    let line = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= FIRST_PROMPT_MAX_CHARS {
        return line;
    }
    let mut cut: String = line.chars().take(FIRST_PROMPT_MAX_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: id.into(),
            created_at: now,
            last_updated: now,
            first_prompt: "fix the build".into(),
            provider: "openrouter".into(),
            model: "m".into(),
            working_dir: PathBuf::from("/work"),
            messages: vec![Message::system("sys"), Message::human("fix the build")],
            context_files: BTreeMap::new(),
        }
    }

    #[test]
    fn record_uses_camel_case_fields() {
        let json = serde_json::to_string(&record("abc")).unwrap();
        for key in [
            "\"id\"",
            "\"createdAt\"",
            "\"lastUpdated\"",
            "\"firstPrompt\"",
            "\"workingDir\"",
            "\"messages\"",
            "\"contextFiles\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn index_entry_from_record() {
        let entry = IndexEntry::from(&record("abc"));
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.message_count, 2);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"messageCount\":2"));
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut index = SessionIndex::default();
        index.upsert(IndexEntry::from(&record("a")));
        let mut newer = record("a");
        newer.first_prompt = "changed".into();
        index.upsert(IndexEntry::from(&newer));
        assert_eq!(index.sessions.len(), 1);
        assert_eq!(index.sessions[0].first_prompt, "changed");
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
    }

    #[test]
    fn sort_newest_first() {
        let mut old = record("old");
        old.last_updated = Utc::now() - Duration::hours(3);
        let mut index = SessionIndex::default();
        index.upsert(IndexEntry::from(&old));
        index.upsert(IndexEntry::from(&record("new")));
        index.sort_newest_first();
        assert_eq!(index.sessions[0].id, "new");
    }

    #[test]
    fn summarize_prompt_truncates() {
        assert_eq!(summarize_prompt("  two\nlines  "), "two lines");
        let long = "x".repeat(250);
        let summary = summarize_prompt(&long);
        assert_eq!(summary.chars().count(), FIRST_PROMPT_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
    }
}
