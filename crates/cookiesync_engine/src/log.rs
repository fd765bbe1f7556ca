//! The user-visible activity log.
//!
//! Entries are persisted newest-first in the logs bucket and mirrored to
//! `tracing`. Appending never fails; a storage error is reported through
//! `tracing` only.

use crate::error::SyncResult;
use crate::persist::{Bucket, PersistentState};
use cookiesync_protocol::{LogBook, LogEntry, LogLevel};
use std::sync::Arc;
use std::time::Duration;

/// Handle to the persisted activity log.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    state: Arc<PersistentState>,
    capacity: usize,
}

impl ActivityLog {
    /// Creates a log over `state` keeping at most `capacity` entries.
    pub fn new(state: Arc<PersistentState>, capacity: usize) -> Self {
        Self { state, capacity }
    }

    /// Appends an entry.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::now(message, level);
        match level {
            LogLevel::Error => tracing::warn!(target: "cookiesync::activity", "{}", entry.message),
            LogLevel::Success | LogLevel::Info => {
                tracing::info!(target: "cookiesync::activity", "{}", entry.message)
            }
        }

        let capacity = self.capacity;
        if let Err(e) = self
            .state
            .update(Bucket::Logs, |book: &mut LogBook| book.push(entry, capacity))
        {
            tracing::error!(error = %e, "failed to write activity log");
        }
    }

    /// Appends an informational entry.
    pub fn info(&self, message: impl Into<String>) {
        self.append(LogLevel::Info, message);
    }

    /// Appends a success entry.
    pub fn success(&self, message: impl Into<String>) {
        self.append(LogLevel::Success, message);
    }

    /// Appends an error entry.
    pub fn error(&self, message: impl Into<String>) {
        self.append(LogLevel::Error, message);
    }

    /// Returns all entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs bucket cannot be read.
    pub fn entries(&self) -> SyncResult<Vec<LogEntry>> {
        let book: LogBook = self.state.load(Bucket::Logs)?;
        Ok(book.into_entries())
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs bucket cannot be removed.
    pub fn clear(&self) -> SyncResult<()> {
        self.state.remove(Bucket::Logs)
    }
}

/// Renders a duration for log messages, e.g. `5 min` or `15s`.
pub(crate) fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else if secs > 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiesync_storage::InMemoryStore;

    fn log(capacity: usize) -> ActivityLog {
        let state = Arc::new(PersistentState::new(Arc::new(InMemoryStore::new())));
        ActivityLog::new(state, capacity)
    }

    #[test]
    fn newest_first_and_bounded() {
        let log = log(3);
        for i in 0..5 {
            log.info(format!("m{i}"));
        }
        let entries = log.entries().unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["m4", "m3", "m2"]);
    }

    #[test]
    fn levels_are_kept() {
        let log = log(10);
        log.success("ok");
        log.error("bad");
        let entries = log.entries().unwrap();
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[1].level, LogLevel::Success);
    }

    #[test]
    fn clear_empties_log() {
        let log = log(10);
        log.info("x");
        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(Duration::from_secs(300)), "5 min");
        assert_eq!(describe_duration(Duration::from_secs(15)), "15s");
        assert_eq!(describe_duration(Duration::from_millis(20)), "20ms");
    }
}
