//! The session aggregate.
//!
//! A [`Session`] owns everything one interactive run mutates: the message
//! history, ephemeral and pinned context files, and the loop detector.
//! It is owned by whoever runs the current turn and is moved, never
//! shared, between the front end and a streaming task.

use chrono::{DateTime, Utc};
use codecrab_core::{Message, MessageHistory, Snapshot, ToolRegistry};
use codecrab_session::SessionRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::loop_detector::LoopDetector;
use crate::scheduler::ToolScheduler;

/// Default bound on model iterations per prompt.
pub const DEFAULT_MAX_TURNS: usize = 50;

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    first_prompt: Option<String>,
    provider: String,
    model: String,
    working_dir: PathBuf,
    history: MessageHistory,
    /// Inlined into the next prompt, then cleared
    context_files: BTreeMap<String, String>,
    /// Inlined into every prompt and persisted
    pinned_files: BTreeMap<String, String>,
    tools: Arc<ToolRegistry>,
    scheduler: Arc<ToolScheduler>,
    pub(crate) loop_detector: LoopDetector,
    max_turns: usize,
}

impl Session {
    /// Start a fresh session with a new id.
    pub fn new(
        system_prompt: impl Into<String>,
        tools: Arc<ToolRegistry>,
        scheduler: Arc<ToolScheduler>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            first_prompt: None,
            provider: String::new(),
            model: String::new(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            history: MessageHistory::new(system_prompt),
            context_files: BTreeMap::new(),
            pinned_files: BTreeMap::new(),
            tools,
            scheduler,
            loop_detector: LoopDetector::default(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Restore a persisted session. Keeps its id and creation time; the
    /// system message is re-inserted from `system_prompt` if missing.
    pub fn from_record(
        record: SessionRecord,
        system_prompt: impl Into<String>,
        tools: Arc<ToolRegistry>,
        scheduler: Arc<ToolScheduler>,
    ) -> Self {
        let first_prompt = (!record.first_prompt.is_empty()).then_some(record.first_prompt);
        Self {
            id: record.id,
            created_at: record.created_at,
            updated_at: record.last_updated,
            first_prompt,
            provider: record.provider,
            model: record.model,
            working_dir: record.working_dir,
            history: MessageHistory::from_messages(record.messages, system_prompt),
            context_files: BTreeMap::new(),
            pinned_files: record.context_files,
            tools,
            scheduler,
            loop_detector: LoopDetector::default(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_detector = LoopDetector::new(threshold);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn messages(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn scheduler(&self) -> &Arc<ToolScheduler> {
        &self.scheduler
    }

    pub fn snapshot(&self) -> Snapshot {
        self.history.snapshot()
    }

    /// Discard everything after `snapshot` and forget repeated-call
    /// tracking. Only the record is rolled back: files a tool already
    /// changed stay changed.
    pub fn rollback_to(&mut self, snapshot: Snapshot) {
        self.history.rollback_to(snapshot);
        self.loop_detector.reset();
        self.updated_at = Utc::now();
    }

    /// Queue a file to be inlined into the next prompt only.
    pub fn add_context_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.context_files.insert(path.into(), content.into());
    }

    /// Inline a file into every prompt from now on.
    pub fn pin_context_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.pinned_files.insert(path.into(), content.into());
    }

    pub fn unpin_context_file(&mut self, path: &str) -> bool {
        self.pinned_files.remove(path).is_some()
    }

    pub fn context_files(&self) -> &BTreeMap<String, String> {
        &self.context_files
    }

    pub fn pinned_files(&self) -> &BTreeMap<String, String> {
        &self.pinned_files
    }

    pub fn first_prompt(&self) -> Option<&str> {
        self.first_prompt.as_deref()
    }

    /// Build the human message text for `prompt` and clear the ephemeral
    /// context files. Pinned files come first, then ephemeral ones.
    pub(crate) fn take_prompt(&mut self, prompt: &str) -> String {
        if self.first_prompt.is_none() {
            self.first_prompt = Some(codecrab_session::summarize_prompt(prompt));
        }
        let ephemeral = std::mem::take(&mut self.context_files);
        if self.pinned_files.is_empty() && ephemeral.is_empty() {
            return prompt.to_string();
        }

        let mut text = String::new();
        for (path, content) in self.pinned_files.iter().chain(ephemeral.iter()) {
            text.push_str(&format!("<context_file path=\"{path}\">\n{content}\n</context_file>\n\n"));
        }
        text.push_str(prompt);
        text
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
        self.updated_at = Utc::now();
    }

    /// The durable projection handed to the session store.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            created_at: self.created_at,
            last_updated: self.updated_at,
            first_prompt: self.first_prompt.clone().unwrap_or_default(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            working_dir: self.working_dir.clone(),
            messages: self.history.messages().to_vec(),
            context_files: self.pinned_files.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("messages", &self.history.len())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
