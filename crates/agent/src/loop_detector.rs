//! Repeated tool-call detection.
//!
//! Each requested call is reduced to a fingerprint over its tool name and
//! canonicalized arguments. When the same fingerprint shows up
//! `threshold` times in a row the agent ends the turn instead of
//! dispatching it again.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Consecutive identical calls that end a turn.
pub const DEFAULT_REPEAT_THRESHOLD: usize = 3;

/// SHA-256 hex digest of `name` and `arguments`.
///
/// Arguments that parse as JSON are re-serialized with sorted keys, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` collide. An empty argument string
/// is the same as `{}`.
pub fn fingerprint(name: &str, arguments: &str) -> String {
    let trimmed = arguments.trim();
    let canonical = if trimmed.is_empty() {
        "{}".to_string()
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => canonicalize(value).to_string(),
            Err(_) => trimmed.to_string(),
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Tracks the last fingerprint and how many times in a row it was seen.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    threshold: usize,
    last: Option<String>,
    repeats: usize,
}

impl LoopDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
            last: None,
            repeats: 0,
        }
    }

    /// Record a fingerprint. Returns `true` once it has been seen
    /// `threshold` times consecutively.
    pub fn record(&mut self, fingerprint: &str) -> bool {
        if self.last.as_deref() == Some(fingerprint) {
            self.repeats += 1;
        } else {
            self.last = Some(fingerprint.to_string());
            self.repeats = 1;
        }
        self.repeats >= self.threshold
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.repeats = 0;
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_THRESHOLD)
    }
}
