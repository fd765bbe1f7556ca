//! User-visible activity log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default capacity of the activity log.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Severity of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    #[default]
    Info,
    /// An operation completed successfully.
    Success,
    /// Something failed or needs attention.
    Error,
}

/// One activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Human-readable message.
    pub message: String,
    /// Severity.
    #[serde(rename = "type", default)]
    pub level: LogLevel,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

/// Most-recent-first ring buffer of log entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogBook {
    entries: Vec<LogEntry>,
}

impl LogBook {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends an entry, dropping the oldest ones beyond `capacity`.
    pub fn push(&mut self, entry: LogEntry, capacity: usize) {
        self.entries.insert(0, entry);
        self.entries.truncate(capacity);
    }

    /// Entries, most recent first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Consumes the log, returning its entries.
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_capped() {
        let mut book = LogBook::new();
        for i in 0..5 {
            book.push(LogEntry::now(format!("m{i}"), LogLevel::Info), 3);
        }
        assert_eq!(book.len(), 3);
        assert_eq!(book.entries()[0].message, "m4");
        assert_eq!(book.entries()[2].message, "m2");
    }

    #[test]
    fn level_serializes_as_type() {
        let entry = LogEntry::now("done", LogLevel::Success);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "success");
    }
}
