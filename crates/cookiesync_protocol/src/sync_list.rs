//! The deduplicated sync list.

use crate::cookie::{CookieRecord, IdentityKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Summary of a staging operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Number of identities that were not in the list before.
    pub added: usize,
    /// Size of the list afterwards.
    pub total: usize,
}

/// Cookies the user keeps alive and mirrored, at most one per identity key.
///
/// The same type holds the retry queue snapshot; both buckets persist as a
/// plain JSON array of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncList {
    records: Vec<CookieRecord>,
}

impl SyncList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from records, later duplicates merging over earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = CookieRecord>) -> Self {
        let mut list = Self::new();
        for record in records {
            list.upsert(record);
        }
        list
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the records.
    pub fn iter(&self) -> impl Iterator<Item = &CookieRecord> {
        self.records.iter()
    }

    /// Returns the records as a slice.
    pub fn records(&self) -> &[CookieRecord] {
        &self.records
    }

    /// Consumes the list, returning its records.
    pub fn into_records(self) -> Vec<CookieRecord> {
        self.records
    }

    fn position(&self, key: &IdentityKey) -> Option<usize> {
        self.records.iter().position(|r| &r.identity_key() == key)
    }

    /// Looks up a record by identity.
    pub fn get(&self, key: &IdentityKey) -> Option<&CookieRecord> {
        self.position(key).map(|i| &self.records[i])
    }

    /// Looks up a record by identity for in-place edits.
    pub fn get_mut(&mut self, key: &IdentityKey) -> Option<&mut CookieRecord> {
        self.position(key).map(move |i| &mut self.records[i])
    }

    /// Returns true if the identity is present.
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.position(key).is_some()
    }

    /// Merges `record` into the list.
    ///
    /// Replaces the matching identity in place (keeping local annotations
    /// per [`CookieRecord::merge`]) or appends it. Returns true if the
    /// identity was new.
    pub fn upsert(&mut self, record: CookieRecord) -> bool {
        match self.position(&record.identity_key()) {
            Some(i) => {
                let merged = CookieRecord::merge(&self.records[i], record);
                self.records[i] = merged;
                false
            }
            None => {
                self.records.push(record);
                true
            }
        }
    }

    /// Upserts a batch of records.
    pub fn stage(&mut self, records: impl IntoIterator<Item = CookieRecord>) -> StageSummary {
        let added = records
            .into_iter()
            .map(|r| self.upsert(r))
            .filter(|added| *added)
            .count();
        StageSummary {
            added,
            total: self.len(),
        }
    }

    /// Removes a record by identity. Returns the removed record.
    pub fn remove(&mut self, key: &IdentityKey) -> Option<CookieRecord> {
        self.position(key).map(|i| self.records.remove(i))
    }

    /// Removes every record matching the predicate. Returns how many were removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&CookieRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !predicate(r));
        before - self.records.len()
    }

    /// Returns the set of identity keys in the list.
    pub fn keys(&self) -> HashSet<IdentityKey> {
        self.records.iter().map(CookieRecord::identity_key).collect()
    }

    /// Combines this list with a queued snapshot.
    ///
    /// Entries of `self` win on key collision; queued entries whose identity
    /// is absent from `self` are appended after them.
    pub fn union_with(&self, queued: &SyncList) -> SyncList {
        let mut combined: Vec<CookieRecord> = self.records.clone();
        let mut seen: HashSet<IdentityKey> = combined.iter().map(|r| r.identity_key()).collect();
        for record in &queued.records {
            if seen.insert(record.identity_key()) {
                combined.push(record.clone());
            }
        }
        SyncList { records: combined }
    }
}

impl FromIterator<CookieRecord> for SyncList {
    fn from_iter<I: IntoIterator<Item = CookieRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

impl<'a> IntoIterator for &'a SyncList {
    type Item = &'a CookieRecord;
    type IntoIter = std::slice::Iter<'a, CookieRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(value: &str) -> CookieRecord {
        CookieRecord::new("sid", ".example.com", "/", value)
    }

    #[test]
    fn upsert_replaces_same_identity() {
        let mut list = SyncList::new();
        assert!(list.upsert(sid("v1")));
        assert!(!list.upsert(sid("v2")));
        assert_eq!(list.len(), 1);
        assert_eq!(list.records()[0].value, "v2");
    }

    #[test]
    fn stage_counts_new_identities() {
        let mut list = SyncList::from_records(vec![sid("v1")]);
        let summary = list.stage(vec![
            sid("v2"),
            CookieRecord::new("token", ".example.com", "/", "t"),
            CookieRecord::new("token", ".example.com", "/", "t2"),
        ]);
        assert_eq!(summary, StageSummary { added: 1, total: 2 });
    }

    #[test]
    fn union_prefers_list_entries() {
        let list = SyncList::from_records(vec![sid("fresh")]);
        let queue = SyncList::from_records(vec![
            sid("stale"),
            CookieRecord::new("other", "b.com", "/", "q"),
        ]);

        let combined = list.union_with(&queue);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined.get(&sid("").identity_key()).unwrap().value, "fresh");
        assert!(combined.contains(&IdentityKey::new("other", "b.com", "/")));
    }

    #[test]
    fn remove_where_reports_count() {
        let mut list = SyncList::from_records(vec![
            sid("v"),
            CookieRecord::new("a", "x.com", "/", "1"),
            CookieRecord::new("b", "x.com", "/", "2"),
        ]);
        assert_eq!(list.remove_where(|r| r.domain == "x.com"), 2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn serializes_as_plain_array() {
        let list = SyncList::from_records(vec![sid("v")]);
        let json = serde_json::to_value(&list).unwrap();
        assert!(json.is_array());
        let back: SyncList = serde_json::from_value(json).unwrap();
        assert_eq!(back, list);
    }
}
