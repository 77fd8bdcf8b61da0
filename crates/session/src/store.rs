//! Asynchronous session store.
//!
//! Saves and discards are handed to a bounded queue and applied in order
//! by a single background worker, so the interactive loop never waits on
//! disk. A full queue drops the write with a warning. Layout under the store root:
//!
//! ```text
//! index.json
//! session-<id>/session.json
//! ```
//!
//! The record is always written before its index entry, and removal drops
//! the index entry before the directory, so the index never names a
//! session whose record is missing.

use chrono::Utc;
use codecrab_core::SessionError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::record::{IndexEntry, SessionIndex, SessionRecord};

const INDEX_FILE: &str = "index.json";
const RECORD_FILE: &str = "session.json";
const DIR_PREFIX: &str = "session-";

/// Eviction and queue bounds.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Sessions kept after cleanup, newest first
    pub max_sessions: usize,
    /// Sessions last updated longer ago than this are removed
    pub max_age: Duration,
    /// Pending saves before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            queue_capacity: 32,
        }
    }
}

/// Work for the writer task, applied in queue order.
#[derive(Debug)]
enum Job {
    Save(SessionRecord),
    Discard(String),
}

/// Durable, asynchronous session persistence.
pub struct SessionStore {
    root: PathBuf,
    config: StoreConfig,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Sessions removed by the cleanup run in `open`
    evicted_on_open: usize,
    /// Serializes every read-modify-write of `index.json`
    index_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionStore {
    /// Open (or create) a store at `root`, evict stale sessions, and start
    /// the write worker.
    pub async fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self, SessionError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let index_lock = Arc::new(tokio::sync::Mutex::new(()));

        let mut store = Self {
            root: root.clone(),
            config,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(None),
            evicted_on_open: 0,
            index_lock: index_lock.clone(),
        };

        match store.cleanup_old_sessions().await {
            Ok(0) => {}
            Ok(removed) => {
                info!(removed, "Evicted old sessions");
                store.evicted_on_open = removed;
            }
            Err(e) => warn!(error = %e, "Session cleanup failed"),
        }

        let handle = tokio::spawn(run_worker(root, index_lock, rx));
        *lock(&store.worker) = Some(handle);

        debug!(root = %store.root.display(), "Session store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// How many sessions the cleanup in [`open`](Self::open) removed.
    pub fn evicted_on_open(&self) -> usize {
        self.evicted_on_open
    }

    /// Queue a copy of `record` for persistence. Never blocks.
    ///
    /// Returns `false` when the save was skipped: the session has no human
    /// message, the queue is full, or the store is shut down.
    pub fn save_session(&self, record: &SessionRecord) -> bool {
        if record.human_message_count() == 0 {
            debug!(session_id = %record.id, "Skipping save of session without human messages");
            return false;
        }

        self.enqueue(Job::Save(record.clone()), &record.id)
    }

    /// Queue removal of a saved session. Saves queued earlier are written
    /// first, so the removal always wins. Never blocks.
    pub fn discard_session(&self, id: &str) -> bool {
        if !is_valid_id(id) {
            return false;
        }
        self.enqueue(Job::Discard(id.to_string()), id)
    }

    /// Persist the current state of a session: save it while it has a
    /// human message, otherwise drop any copy already on disk.
    pub fn sync_session(&self, record: &SessionRecord) -> bool {
        if record.human_message_count() == 0 {
            self.discard_session(&record.id)
        } else {
            self.save_session(record)
        }
    }

    fn enqueue(&self, job: Job, id: &str) -> bool {
        let Some(tx) = lock(&self.tx).clone() else {
            warn!(session_id = %id, "Session store is shut down, dropping write");
            return false;
        };

        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, "Session write queue full, dropping write");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(session_id = %id, "Session writer stopped, dropping write");
                false
            }
        }
    }

    /// Index entries, newest first, at most `limit`.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<IndexEntry>, SessionError> {
        let _guard = self.index_lock.lock().await;
        let mut index = read_index(&self.root).await?;
        index.sort_newest_first();
        index.sessions.truncate(limit);
        Ok(index.sessions)
    }

    /// Read one full record.
    pub async fn load_session(&self, id: &str) -> Result<SessionRecord, SessionError> {
        if !is_valid_id(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        let path = record_path(&self.root, id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| SessionError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Remove one session from the index and disk.
    pub async fn delete_session(&self, id: &str) -> Result<bool, SessionError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let _guard = self.index_lock.lock().await;
        remove(&self.root, id).await
    }

    /// Remove every session beyond `max_sessions` (newest kept) or older
    /// than `max_age`. Returns how many were removed.
    pub async fn cleanup_old_sessions(&self) -> Result<usize, SessionError> {
        let _guard = self.index_lock.lock().await;
        let mut index = read_index(&self.root).await?;
        index.sort_newest_first();

        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(self.config.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));

        let (kept, evicted): (Vec<_>, Vec<_>) = index
            .sessions
            .into_iter()
            .enumerate()
            .partition(|(pos, entry)| {
                *pos < self.config.max_sessions
                    && cutoff.is_none_or(|c| entry.last_updated >= c)
            });

        if evicted.is_empty() {
            return Ok(0);
        }

        let index = SessionIndex {
            sessions: kept.into_iter().map(|(_, e)| e).collect(),
        };
        write_index(&self.root, &index).await?;

        for (_, entry) in &evicted {
            let dir = session_dir(&self.root, &entry.id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(session_id = %entry.id, error = %e, "Failed to remove session directory");
            }
        }
        Ok(evicted.len())
    }

    /// Rebuild `index.json` by scanning session directories.
    pub async fn rebuild_index(&self) -> Result<usize, SessionError> {
        let _guard = self.index_lock.lock().await;
        let index = scan_records(&self.root).await?;
        write_index(&self.root, &index).await?;
        Ok(index.sessions.len())
    }

    /// Stop accepting saves and wait for every queued save to be written.
    pub async fn shutdown(&self) {
        drop(lock(&self.tx).take());
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Session writer task failed");
        }
        debug!("Session store shut down");
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_worker(
    root: PathBuf,
    index_lock: Arc<tokio::sync::Mutex<()>>,
    mut rx: mpsc::Receiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Save(record) => match persist(&root, &index_lock, &record).await {
                Ok(()) => debug!(session_id = %record.id, messages = record.messages.len(), "Session saved"),
                Err(e) => warn!(session_id = %record.id, error = %e, "Failed to save session"),
            },
            Job::Discard(id) => {
                let _guard = index_lock.lock().await;
                match remove(&root, &id).await {
                    Ok(removed) => debug!(session_id = %id, removed, "Session discarded"),
                    Err(e) => warn!(session_id = %id, error = %e, "Failed to discard session"),
                }
            }
        }
    }
}

async fn persist(
    root: &Path,
    index_lock: &tokio::sync::Mutex<()>,
    record: &SessionRecord,
) -> Result<(), SessionError> {
    let body = serde_json::to_vec_pretty(record).map_err(|e| SessionError::Storage(e.to_string()))?;

    // Held across both writes: no delete or cleanup runs between the
    // record and its index entry.
    let _guard = index_lock.lock().await;
    let dir = session_dir(root, &record.id);
    tokio::fs::create_dir_all(&dir).await?;
    write_atomic(&dir.join(RECORD_FILE), &body).await?;

    let mut index = read_index(root).await?;
    index.upsert(IndexEntry::from(record));
    write_index(root, &index).await
}

/// Drop the index entry, then the directory. Caller holds the index lock.
async fn remove(root: &Path, id: &str) -> Result<bool, SessionError> {
    let mut index = read_index(root).await?;
    let in_index = index.remove(id);
    if in_index {
        write_index(root, &index).await?;
    }

    let dir = session_dir(root, id);
    let on_disk = tokio::fs::try_exists(&dir).await.unwrap_or(false);
    if on_disk {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    Ok(in_index || on_disk)
}

/// Read the index, rebuilding it from disk if missing or unreadable.
async fn read_index(root: &Path) -> Result<SessionIndex, SessionError> {
    let path = root.join(INDEX_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt session index, rebuilding");
                scan_records(root).await
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => scan_records(root).await,
        Err(e) => Err(e.into()),
    }
}

async fn write_index(root: &Path, index: &SessionIndex) -> Result<(), SessionError> {
    let body = serde_json::to_vec_pretty(index).map_err(|e| SessionError::Storage(e.to_string()))?;
    write_atomic(&root.join(INDEX_FILE), &body).await
}

/// Build an index from every readable `session-*/session.json`.
async fn scan_records(root: &Path) -> Result<SessionIndex, SessionError> {
    let mut index = SessionIndex::default();
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(DIR_PREFIX) {
            continue;
        }
        let path = entry.path().join(RECORD_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => index.upsert(IndexEntry::from(&record)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupted session record"),
        }
    }
    Ok(index)
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), SessionError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn session_dir(root: &Path, id: &str) -> PathBuf {
    root.join(format!("{DIR_PREFIX}{id}"))
}

fn record_path(root: &Path, id: &str) -> PathBuf {
    session_dir(root, id).join(RECORD_FILE)
}

/// Ids become directory names, so only allow a safe alphabet.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecrab_core::Message;
    use std::collections::BTreeMap;

    fn record(id: &str, hours_ago: i64) -> SessionRecord {
        let at = Utc::now() - chrono::Duration::hours(hours_ago);
        SessionRecord {
            id: id.into(),
            created_at: at,
            last_updated: at,
            first_prompt: format!("prompt {id}"),
            provider: "openrouter".into(),
            model: "test-model".into(),
            working_dir: PathBuf::from("/work"),
            messages: vec![
                Message::system("sys"),
                Message::human(format!("prompt {id}")),
                Message::assistant("ok", vec![]),
            ],
            context_files: BTreeMap::new(),
        }
    }

    async fn open(dir: &Path, config: StoreConfig) -> SessionStore {
        SessionStore::open(dir, config).await.unwrap()
    }

    #[tokio::test]
    async fn save_then_list_after_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;

        assert!(store.save_session(&record("a", 2)));
        assert!(store.save_session(&record("b", 1)));
        store.shutdown().await;

        let list = store.list_sessions(10).await.unwrap();
        let ids: Vec<_> = list.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(list[0].message_count, 3);
        assert!(tmp.path().join("session-a").join("session.json").exists());
        assert!(!tmp.path().join("session-a").join("session.json.tmp").exists());
    }

    #[tokio::test]
    async fn session_without_human_message_is_never_written() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;

        let mut empty = record("empty", 0);
        empty.messages = vec![Message::system("sys")];
        assert!(!store.save_session(&empty));
        store.shutdown().await;

        assert!(store.list_sessions(10).await.unwrap().is_empty());
        assert!(!tmp.path().join("session-empty").exists());
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            store.save_session(&record(id, i as i64));
        }
        store.shutdown().await;

        let list = store.list_sessions(2).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "a");
        assert_eq!(list[1].id, "b");
    }

    #[tokio::test]
    async fn resaving_updates_single_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;

        let mut rec = record("a", 1);
        store.save_session(&rec);
        rec.messages.push(Message::human("again"));
        rec.last_updated = Utc::now();
        store.save_session(&rec);
        store.shutdown().await;

        let list = store.list_sessions(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message_count, 4);
        assert_eq!(store.load_session("a").await.unwrap(), rec);
    }

    #[tokio::test]
    async fn save_after_shutdown_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        store.shutdown().await;
        assert!(!store.save_session(&record("late", 0)));
    }

    #[tokio::test]
    async fn load_unknown_session_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        let err = store.load_session("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        let err = store.load_session("../escape").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn cleanup_enforces_max_count() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            store.save_session(&record(id, i as i64));
        }
        store.shutdown().await;

        let store = open(
            tmp.path(),
            StoreConfig {
                max_sessions: 2,
                ..StoreConfig::default()
            },
        )
        .await;

        let ids: Vec<_> = store
            .list_sessions(10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!tmp.path().join("session-c").exists());
        store.shutdown().await;
    }

    #[tokio::test]
    async fn cleanup_enforces_max_age() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                max_age: Duration::from_secs(24 * 60 * 60),
                ..StoreConfig::default()
            },
        )
        .await;
        store.save_session(&record("fresh", 1));
        store.save_session(&record("stale", 48));
        store.shutdown().await;

        assert_eq!(store.cleanup_old_sessions().await.unwrap(), 1);
        let list = store.list_sessions(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "fresh");
        assert!(!tmp.path().join("session-stale").exists());
        assert_eq!(store.cleanup_old_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_index_entry_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        store.save_session(&record("a", 0));
        store.shutdown().await;

        assert!(store.delete_session("a").await.unwrap());
        assert!(!store.delete_session("a").await.unwrap());
        assert!(store.list_sessions(10).await.unwrap().is_empty());
        assert!(!tmp.path().join("session-a").exists());
    }

    #[tokio::test]
    async fn sync_without_prompts_discards_saved_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;

        let mut rec = record("a", 0);
        assert!(store.sync_session(&rec));
        rec.messages.truncate(1);
        assert!(store.sync_session(&rec));
        store.shutdown().await;

        assert!(store.list_sessions(10).await.unwrap().is_empty());
        assert!(matches!(
            store.load_session("a").await.unwrap_err(),
            SessionError::NotFound(_)
        ));
        assert!(!tmp.path().join("session-a").exists());
    }

    #[tokio::test]
    async fn discard_of_unknown_session_is_harmless() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        store.save_session(&record("keep", 0));
        assert!(store.discard_session("never-saved"));
        assert!(!store.discard_session("../escape"));
        store.shutdown().await;

        let list = store.list_sessions(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "keep");
    }

    #[tokio::test]
    async fn open_reports_its_own_eviction() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            store.save_session(&record(id, i as i64));
        }
        store.shutdown().await;
        assert_eq!(store.evicted_on_open(), 0);

        let store = open(
            tmp.path(),
            StoreConfig {
                max_sessions: 1,
                ..StoreConfig::default()
            },
        )
        .await;
        assert_eq!(store.evicted_on_open(), 2);
        assert_eq!(store.cleanup_old_sessions().await.unwrap(), 0);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn save_racing_delete_leaves_no_dangling_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(open(tmp.path(), StoreConfig::default()).await);

        for _ in 0..20 {
            store.save_session(&record("a", 0));
            store.delete_session("a").await.unwrap();
        }
        store.shutdown().await;

        // Whatever order the worker and the deletes interleaved in, the
        // index only names sessions whose record exists.
        for entry in store.list_sessions(10).await.unwrap() {
            assert!(store.load_session(&entry.id).await.is_ok());
        }
    }

    #[tokio::test]
    async fn corrupt_index_is_rebuilt_from_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path(), StoreConfig::default()).await;
        store.save_session(&record("a", 1));
        store.save_session(&record("b", 0));
        store.shutdown().await;

        std::fs::write(tmp.path().join("index.json"), "{ not json").unwrap();
        std::fs::create_dir_all(tmp.path().join("session-bad")).unwrap();
        std::fs::write(tmp.path().join("session-bad").join("session.json"), "[]").unwrap();

        let list = store.list_sessions(10).await.unwrap();
        let ids: Vec<_> = list.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert_eq!(store.rebuild_index().await.unwrap(), 2);
    }
}
