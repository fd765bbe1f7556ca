//! Key/value store trait definition.

use crate::error::{StorageError, StorageResult};

/// A persistent key/value store for engine state buckets.
///
/// Stores are **opaque byte stores**. The engine serializes each bucket and
/// replaces it wholesale; stores never merge or patch values.
///
/// # Invariants
///
/// - `get` after `set` returns exactly the bytes written
/// - `set` is atomic: a concurrent or later `get` never sees a partial value
/// - `remove` of a missing key is not an error
/// - Stores must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key` and its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists the stored keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Removes every key.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn clear(&self) -> StorageResult<()> {
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }
}

/// Checks that `key` is non-empty and made of `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("syncList").is_ok());
        assert!(validate_key("cookie-syncer_logs").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a b").is_err());
    }
}
