//! Per-cookie keep-alive statistics.

use crate::cookie::IdentityKey;
use crate::snapshot::RenewalStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Default number of history entries kept per cookie.
pub const DEFAULT_STAT_HISTORY: usize = 20;

/// What produced a statistics entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    /// The periodic keep-alive cycle.
    KeepAlive,
    /// A live cookie-change notification.
    OnChange,
}

/// One evaluation in a cookie's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatHistory {
    /// Evaluation outcome.
    pub status: RenewalStatus,
    /// When the evaluation happened.
    pub timestamp: DateTime<Utc>,
    /// What triggered it.
    pub change_source: ChangeSource,
    /// Seconds since the previous recorded change, if there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Statistics of a single cookie identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatEntry {
    /// Number of successful renewals.
    pub success_count: u64,
    /// Number of failed evaluations.
    pub failure_count: u64,
    /// Timestamp of the last success or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_timestamp: Option<DateTime<Utc>>,
    /// Most-recent-first history.
    #[serde(default)]
    pub history: Vec<StatHistory>,
    /// Live expiration, filled in only when reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    /// Live value, filled in only when reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl StatEntry {
    /// Records an evaluation.
    ///
    /// Success and failure bump their counter and move the last-change
    /// timestamp; a no-change evaluation only adds a history entry.
    pub fn record(
        &mut self,
        status: RenewalStatus,
        source: ChangeSource,
        error: Option<String>,
        now: DateTime<Utc>,
        history_limit: usize,
    ) {
        let interval_seconds = self
            .last_change_timestamp
            .map(|last| (now - last).num_milliseconds())
            .map(|ms| (ms as f64 / 1000.0).round() as i64);

        match status {
            RenewalStatus::Success => self.success_count += 1,
            RenewalStatus::Failure => self.failure_count += 1,
            RenewalStatus::NoChange => {}
        }
        if status != RenewalStatus::NoChange {
            self.last_change_timestamp = Some(now);
        }

        self.history.insert(
            0,
            StatHistory {
                status,
                timestamp: now,
                change_source: source,
                interval_seconds,
                error: error.filter(|_| status == RenewalStatus::Failure),
            },
        );
        self.history.truncate(history_limit);
    }
}

/// Statistics of all cookies, keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsBook {
    entries: BTreeMap<IdentityKey, StatEntry>,
}

impl StatsBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry of an identity.
    pub fn get(&self, key: &IdentityKey) -> Option<&StatEntry> {
        self.entries.get(key)
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &StatEntry)> {
        self.entries.iter()
    }

    /// Iterates mutably over all entries.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&IdentityKey, &mut StatEntry)> {
        self.entries.iter_mut()
    }

    /// Records an evaluation, creating the entry on first use.
    pub fn record(
        &mut self,
        key: &IdentityKey,
        status: RenewalStatus,
        source: ChangeSource,
        error: Option<String>,
        now: DateTime<Utc>,
        history_limit: usize,
    ) {
        self.entries
            .entry(key.clone())
            .or_default()
            .record(status, source, error, now, history_limit);
    }

    /// Drops entries whose identity is not in `valid`. Returns how many were dropped.
    pub fn retain_keys(&mut self, valid: &HashSet<IdentityKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| valid.contains(key));
        before - self.entries.len()
    }
}
