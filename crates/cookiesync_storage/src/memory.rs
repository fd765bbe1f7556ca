//! In-memory key/value store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key/value store.
///
/// This store keeps every bucket in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Hosts that do not need state to survive a restart
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use cookiesync_storage::{KeyValueStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.set("syncQueue", b"[]").unwrap();
/// assert_eq!(store.keys().unwrap(), vec!["syncQueue".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            data: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Returns a copy of all stored entries.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.read().clone()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    fn clear(&self) -> StorageResult<()> {
        self.data.write().clear();
        Ok(())
    }
}
