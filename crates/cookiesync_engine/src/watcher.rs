//! Live cookie-change handling.

use crate::engine::Shared;
use crate::error::SyncResult;
use crate::host::{ChangeCause, CookieChange};
use crate::persist::Bucket;
use crate::sync::SyncEngine;
use chrono::Utc;
use cookiesync_protocol::{ChangeSource, IdentityKey, RenewalStatus, StageSummary, StatsBook};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// What [`ChangeWatcher::handle`] did with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Removals and non-explicit causes are ignored.
    Ignored,
    /// The cookie is not in the sync list.
    NotMonitored,
    /// The cookie was merged into the sync list.
    Staged(StageSummary),
}

/// Stages explicit changes of monitored cookies.
///
/// The monitored set mirrors the identities of the sync list. Every write
/// to the sync list, by any component, is seen on the storage change feed
/// and refreshes the set before the next change is handled.
pub struct ChangeWatcher {
    shared: Shared,
    sync: Arc<SyncEngine>,
    monitored: RwLock<HashSet<IdentityKey>>,
    storage: Mutex<broadcast::Receiver<Bucket>>,
}

impl ChangeWatcher {
    pub(crate) fn new(shared: Shared, sync: Arc<SyncEngine>) -> Self {
        let storage = Mutex::new(shared.state.subscribe());
        Self {
            shared,
            sync,
            monitored: RwLock::new(HashSet::new()),
            storage,
        }
    }

    /// Reloads the monitored set from the sync list. Returns its size.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync list cannot be read; the previous set is kept.
    pub fn refresh(&self) -> SyncResult<usize> {
        let keys = self.sync.sync_list()?.keys();
        let count = keys.len();
        *self.monitored.write() = keys;
        tracing::debug!(count, "monitored set refreshed");
        Ok(count)
    }

    /// Drains pending storage notifications and refreshes if the sync list
    /// changed. Returns true if a refresh happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh fails.
    pub fn catch_up(&self) -> SyncResult<bool> {
        let mut stale = false;
        {
            let mut storage = self.storage.lock();
            loop {
                match storage.try_recv() {
                    Ok(Bucket::SyncList) | Err(TryRecvError::Lagged(_)) => stale = true,
                    Ok(_) => {}
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        if stale {
            self.refresh()?;
        }
        Ok(stale)
    }

    /// Returns true if `key` is monitored.
    pub fn is_monitored(&self, key: &IdentityKey) -> bool {
        self.monitored.read().contains(key)
    }

    /// Number of monitored identities.
    pub fn monitored_len(&self) -> usize {
        self.monitored.read().len()
    }

    /// Handles one live change.
    ///
    /// # Errors
    ///
    /// Returns an error if persistent state cannot be read or written.
    pub fn handle(&self, change: &CookieChange) -> SyncResult<WatchOutcome> {
        if change.removed || change.cause != ChangeCause::Explicit {
            return Ok(WatchOutcome::Ignored);
        }
        self.catch_up()?;

        let key = change.cookie.identity_key();
        if !self.is_monitored(&key) {
            return Ok(WatchOutcome::NotMonitored);
        }

        let summary = self.sync.stage_change(vec![change.cookie.clone()])?;

        let now = Utc::now();
        let history = self.shared.config.stat_history;
        self.shared
            .state
            .update(Bucket::Stats, |book: &mut StatsBook| {
                book.record(
                    &key,
                    RenewalStatus::Success,
                    ChangeSource::OnChange,
                    None,
                    now,
                    history,
                );
            })?;
        Ok(WatchOutcome::Staged(summary))
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("monitored", &self.monitored_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineBuilder;
    use crate::host::MemoryCookieStore;
    use crate::loader::MockSilentLoader;
    use crate::transport::MockRemote;
    use crate::{Engine, EngineEvents};
    use cookiesync_protocol::{CookieRecord, SyncList};
    use cookiesync_storage::InMemoryStore;

    fn engine() -> (Engine, EngineEvents) {
        EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(Arc::new(MemoryCookieStore::new()))
            .silent_loader(Arc::new(MockSilentLoader::new()))
            .build()
            .unwrap()
    }

    fn change(cookie: CookieRecord, removed: bool, cause: ChangeCause) -> CookieChange {
        CookieChange {
            cookie,
            removed,
            cause,
        }
    }

    #[tokio::test]
    async fn stages_explicit_changes_of_monitored_cookies() {
        let (engine, _events) = engine();
        engine
            .sync()
            .stage_change(vec![CookieRecord::new("sid", ".example.com", "/", "v1")])
            .unwrap();

        let outcome = engine
            .watcher()
            .handle(&change(
                CookieRecord::new("sid", ".example.com", "/", "v2"),
                false,
                ChangeCause::Explicit,
            ))
            .unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::Staged(StageSummary { added: 0, total: 1 })
        );
        assert_eq!(engine.sync().sync_list().unwrap().records()[0].value, "v2");

        let stats: StatsBook = engine.state().load(Bucket::Stats).unwrap();
        let entry = stats.iter().next().unwrap().1;
        assert_eq!(entry.history[0].change_source, ChangeSource::OnChange);
    }

    #[tokio::test]
    async fn ignores_removals_and_other_causes() {
        let (engine, _events) = engine();
        let cookie = CookieRecord::new("sid", ".example.com", "/", "v1");
        engine.sync().stage_change(vec![cookie.clone()]).unwrap();

        let watcher = engine.watcher();
        for (removed, cause) in [
            (true, ChangeCause::Explicit),
            (false, ChangeCause::Overwrite),
            (false, ChangeCause::Expired),
            (false, ChangeCause::Evicted),
            (false, ChangeCause::ExpiredOverwrite),
        ] {
            let outcome = watcher.handle(&change(cookie.clone(), removed, cause)).unwrap();
            assert_eq!(outcome, WatchOutcome::Ignored);
        }
    }

    #[tokio::test]
    async fn leading_dot_is_a_different_identity() {
        let (engine, _events) = engine();
        engine
            .sync()
            .stage_change(vec![CookieRecord::new("sid", ".example.com", "/", "v1")])
            .unwrap();
        let outcome = engine
            .watcher()
            .handle(&change(
                CookieRecord::new("sid", "example.com", "/", "v2"),
                false,
                ChangeCause::Explicit,
            ))
            .unwrap();
        assert_eq!(outcome, WatchOutcome::NotMonitored);
    }

    #[tokio::test]
    async fn external_rewrite_refreshes_monitored_set() {
        let (engine, _events) = engine();
        let watcher = engine.watcher();
        assert_eq!(watcher.monitored_len(), 0);

        let cookie = CookieRecord::new("a", "example.com", "/", "1");
        engine
            .state()
            .save(Bucket::SyncList, &SyncList::from_records([cookie.clone()]))
            .unwrap();
        assert!(watcher.catch_up().unwrap());
        assert!(watcher.is_monitored(&cookie.identity_key()));
        assert!(!watcher.catch_up().unwrap());

        engine.state().remove(Bucket::SyncList).unwrap();
        let outcome = watcher
            .handle(&change(cookie, false, ChangeCause::Explicit))
            .unwrap();
        assert_eq!(outcome, WatchOutcome::NotMonitored);
    }
}
