//! Typed, bucketed access to the host key/value store.
//!
//! Every bucket is serialized as JSON and written wholesale. Mutations go
//! through [`PersistentState::update`], which performs the whole
//! read-modify-write under one lock without suspending, so concurrent
//! handlers never interleave inside a bucket update.

use crate::error::{SyncError, SyncResult};
use cookiesync_storage::KeyValueStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANGE_FEED_CAPACITY: usize = 256;

/// A named partition of the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// The sync list.
    SyncList,
    /// The retry queue.
    RetryQueue,
    /// Keep-alive statistics.
    Stats,
    /// User settings.
    Settings,
    /// The activity log.
    Logs,
}

impl Bucket {
    /// All buckets.
    pub const ALL: [Bucket; 5] = [
        Bucket::SyncList,
        Bucket::RetryQueue,
        Bucket::Stats,
        Bucket::Settings,
        Bucket::Logs,
    ];

    /// Storage key of the bucket.
    pub fn key(&self) -> &'static str {
        match self {
            Bucket::SyncList => "syncList",
            Bucket::RetryQueue => "syncQueue",
            Bucket::Stats => "keepAliveStats",
            Bucket::Settings => "syncSettings",
            Bucket::Logs => "cookieSyncerLogs",
        }
    }

    /// Looks a bucket up by storage key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.key() == key)
    }
}

/// Bucketed JSON state over a [`KeyValueStore`], with a change feed.
pub struct PersistentState {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<Bucket>,
}

impl PersistentState {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Subscribes to the names of buckets written from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Bucket> {
        self.changes.subscribe()
    }

    /// Loads a bucket, returning the default value if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Corrupted`] if the stored value does not parse.
    pub fn load<T: DeserializeOwned + Default>(&self, bucket: Bucket) -> SyncResult<T> {
        Ok(self.load_opt(bucket)?.unwrap_or_default())
    }

    /// Loads a bucket, returning `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Corrupted`] if the stored value does not parse.
    pub fn load_opt<T: DeserializeOwned>(&self, bucket: Bucket) -> SyncResult<Option<T>> {
        match self.store.get(bucket.key())? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                SyncError::Corrupted(format!("bucket {} does not parse: {e}", bucket.key()))
            }),
        }
    }

    /// Loads a bucket as untyped JSON, for shape checks.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Corrupted`] if the stored value is not JSON.
    pub fn load_raw(&self, bucket: Bucket) -> SyncResult<Option<serde_json::Value>> {
        self.load_opt(bucket)
    }

    /// Replaces a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save<T: Serialize>(&self, bucket: Bucket, value: &T) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        self.write(bucket, value)
    }

    /// Removes a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn remove(&self, bucket: Bucket) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(bucket.key())?;
        self.notify(bucket);
        Ok(())
    }

    /// Removes every bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear_all(&self) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        self.store.clear()?;
        for bucket in Bucket::ALL {
            self.notify(bucket);
        }
        Ok(())
    }

    /// Atomically loads, mutates and saves a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the load or save fails. Nothing is written when
    /// the load fails.
    pub fn update<T, R>(&self, bucket: Bucket, f: impl FnOnce(&mut T) -> R) -> SyncResult<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _guard = self.write_lock.lock();
        let mut value: T = self.load(bucket)?;
        let result = f(&mut value);
        self.write(bucket, &value)?;
        Ok(result)
    }

    /// Like [`update`](Self::update), but the closure decides whether to save.
    ///
    /// # Errors
    ///
    /// Returns an error if the load, the closure or the save fails.
    pub fn try_update<T, R>(
        &self,
        bucket: Bucket,
        f: impl FnOnce(&mut T) -> SyncResult<(R, bool)>,
    ) -> SyncResult<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _guard = self.write_lock.lock();
        let mut value: T = self.load(bucket)?;
        let (result, changed) = f(&mut value)?;
        if changed {
            self.write(bucket, &value)?;
        }
        Ok(result)
    }

    fn write<T: Serialize>(&self, bucket: Bucket, value: &T) -> SyncResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| SyncError::Corrupted(format!("bucket {} does not serialize: {e}", bucket.key())))?;
        self.store.set(bucket.key(), &bytes)?;
        self.notify(bucket);
        Ok(())
    }

    fn notify(&self, bucket: Bucket) {
        // No receivers is fine.
        let _ = self.changes.send(bucket);
    }
}

impl std::fmt::Debug for PersistentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentState")
            .field("subscribers", &self.changes.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiesync_protocol::{CookieRecord, SyncList};
    use cookiesync_storage::InMemoryStore;

    fn state() -> (Arc<InMemoryStore>, PersistentState) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), PersistentState::new(store))
    }

    #[test]
    fn missing_bucket_loads_default() {
        let (_, state) = state();
        let list: SyncList = state.load(Bucket::SyncList).unwrap();
        assert!(list.is_empty());
        assert!(state.load_opt::<SyncList>(Bucket::RetryQueue).unwrap().is_none());
    }

    #[test]
    fn save_uses_original_keys() {
        let (store, state) = state();
        let list = SyncList::from_records([CookieRecord::new("sid", "a.com", "/", "v")]);
        state.save(Bucket::SyncList, &list).unwrap();

        let raw = store.get("syncList").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["name"], "sid");
    }

    #[test]
    fn update_is_read_modify_write() {
        let (_, state) = state();
        let added = state
            .update(Bucket::SyncList, |list: &mut SyncList| {
                list.upsert(CookieRecord::new("a", "x.com", "/", "1"))
            })
            .unwrap();
        assert!(added);

        state
            .update(Bucket::SyncList, |list: &mut SyncList| {
                list.upsert(CookieRecord::new("b", "x.com", "/", "1"))
            })
            .unwrap();
        let list: SyncList = state.load(Bucket::SyncList).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn corrupted_bucket_is_reported_and_left_untouched() {
        let store = Arc::new(InMemoryStore::with_entries([("syncList", b"{\"x\":1}".to_vec())]));
        let state = PersistentState::new(store.clone());

        let result = state.update(Bucket::SyncList, |list: &mut SyncList| list.len());
        assert!(matches!(result, Err(SyncError::Corrupted(_))));
        assert_eq!(store.get("syncList").unwrap().unwrap(), b"{\"x\":1}");

        let raw = state.load_raw(Bucket::SyncList).unwrap().unwrap();
        assert!(raw.is_object());
    }

    #[test]
    fn try_update_skips_unchanged() {
        let (_, state) = state();
        let mut feed = state.subscribe();
        state
            .try_update(Bucket::Stats, |_: &mut serde_json::Map<String, serde_json::Value>| {
                Ok(((), false))
            })
            .unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn writes_are_broadcast() {
        let (_, state) = state();
        let mut feed = state.subscribe();

        state.save(Bucket::Settings, &serde_json::json!({})).unwrap();
        state.remove(Bucket::RetryQueue).unwrap();

        assert_eq!(feed.try_recv().unwrap(), Bucket::Settings);
        assert_eq!(feed.try_recv().unwrap(), Bucket::RetryQueue);
    }

    #[test]
    fn clear_all_notifies_every_bucket() {
        let (store, state) = state();
        state.save(Bucket::SyncList, &SyncList::new()).unwrap();
        let mut feed = state.subscribe();

        state.clear_all().unwrap();
        assert!(store.keys().unwrap().is_empty());
        let mut seen = Vec::new();
        while let Ok(bucket) = feed.try_recv() {
            seen.push(bucket);
        }
        assert_eq!(seen.len(), Bucket::ALL.len());
    }

    #[test]
    fn bucket_key_round_trip() {
        for bucket in Bucket::ALL {
            assert_eq!(Bucket::from_key(bucket.key()), Some(bucket));
        }
        assert_eq!(Bucket::from_key("other"), None);
    }
}
