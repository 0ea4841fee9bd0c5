//! Append-only audit log embedded in each tracker entry.
//!
//! Every mutation of a tracker entry appends exactly one record; records are
//! never edited, removed, or reordered. The required fields (`status`,
//! `timestamp`, `commit`) are statically typed; transition-specific fields
//! (reviewer id on assignment and approval, caller-supplied keys on commit
//! updates) live in a flattened extension map so the persisted JSON stays
//! forward-compatible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::CommitSha;
use crate::status::TrackerStatus;

/// One structured record of a tracker entry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: TrackerStatus,
    pub timestamp: DateTime<Utc>,
    pub commit: CommitSha,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(status: TrackerStatus, timestamp: DateTime<Utc>, commit: CommitSha) -> Self {
        Self {
            status,
            timestamp,
            commit,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach transition-specific fields to this record.
    pub fn with_extra(mut self, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extra = extra;
        self
    }
}

/// Ordered, append-only history of a tracker entry.
///
/// The only mutation is [`AuditLog::append`]; readers always see the full
/// sequence, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog(Vec<LogEntry>);

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a log with its first record (used at initiation).
    pub fn starting_with(entry: LogEntry) -> Self {
        Self(vec![entry])
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The full ordered sequence, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.0
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.0.last()
    }
}
