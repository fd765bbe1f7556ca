//! Integrity checks, backup and startup recovery.

use crate::engine::Shared;
use crate::error::{SyncError, SyncResult};
use crate::persist::Bucket;
use crate::sync::{PushOutcome, SyncEngine};
use cookiesync_protocol::{Backup, StatsBook, SyncList};
use serde::Serialize;
use std::sync::Arc;

/// Result of [`Maintenance::integrity_check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Statistics entries dropped because their cookie left the sync list.
    pub orphans_removed: usize,
    /// Identities in the sync list.
    pub monitored: usize,
}

/// Housekeeping over the persisted buckets.
#[derive(Debug)]
pub struct Maintenance {
    shared: Shared,
    sync: Arc<SyncEngine>,
}

impl Maintenance {
    pub(crate) fn new(shared: Shared, sync: Arc<SyncEngine>) -> Self {
        Self { shared, sync }
    }

    /// Verifies bucket shapes and drops statistics of unmonitored cookies.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Corrupted`] without writing anything if the sync
    /// list is not an array or the statistics are not an object.
    pub fn integrity_check(&self) -> SyncResult<IntegrityReport> {
        let state = &self.shared.state;
        if let Some(raw) = state.load_raw(Bucket::SyncList)? {
            if !raw.is_array() {
                return Err(self.aborted("sync list is not an array"));
            }
        }
        if let Some(raw) = state.load_raw(Bucket::Stats)? {
            if !raw.is_object() {
                return Err(self.aborted("statistics are not an object"));
            }
        }

        let valid = state.load::<SyncList>(Bucket::SyncList)?.keys();
        let orphans_removed = state.try_update(Bucket::Stats, |book: &mut StatsBook| {
            let removed = book.retain_keys(&valid);
            Ok((removed, removed > 0))
        })?;
        if orphans_removed > 0 {
            self.shared.log.info(format!(
                "Integrity check removed {orphans_removed} orphaned statistics entries."
            ));
        }
        Ok(IntegrityReport {
            orphans_removed,
            monitored: valid.len(),
        })
    }

    fn aborted(&self, reason: &str) -> SyncError {
        self.shared
            .log
            .error(format!("Integrity check aborted: {reason}."));
        SyncError::Corrupted(reason.to_string())
    }

    /// Exports the user-owned buckets. The retry queue is not included.
    ///
    /// # Errors
    ///
    /// Returns an error if a bucket cannot be read.
    pub fn export_all(&self) -> SyncResult<Backup> {
        let state = &self.shared.state;
        Ok(Backup {
            logs: state.load_opt(Bucket::Logs)?,
            sync_list: state.load_opt(Bucket::SyncList)?,
            stats: state.load_opt(Bucket::Stats)?,
            settings: state.load_opt(Bucket::Settings)?,
        })
    }

    /// Replaces every bucket with the contents of `backup`.
    ///
    /// Callers normally go through [`crate::Engine::import_all`], which also
    /// refreshes the components that cache bucket contents.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] if the backup lacks the sync
    /// list or the settings; nothing is cleared in that case.
    pub fn import_all(&self, backup: Backup) -> SyncResult<()> {
        backup.validate()?;
        let state = &self.shared.state;
        state.clear_all()?;

        if let Some(logs) = &backup.logs {
            state.save(Bucket::Logs, logs)?;
        }
        if let Some(list) = backup.sync_list {
            state.save(Bucket::SyncList, &SyncList::from_records(list.into_records()))?;
        }
        if let Some(stats) = &backup.stats {
            state.save(Bucket::Stats, stats)?;
        }
        if let Some(settings) = &backup.settings {
            state.save(Bucket::Settings, settings)?;
        }
        self.shared.log.success("Data imported.");
        Ok(())
    }

    /// Pushes a retry queue left over from an earlier run.
    ///
    /// Returns `None` if the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns the failure of the push; a retry alarm is armed as for any
    /// failed push.
    pub async fn recover_pending(&self) -> SyncResult<Option<PushOutcome>> {
        let queued = self.sync.retry_queue()?;
        if queued.is_empty() {
            return Ok(None);
        }
        self.shared.log.info(format!(
            "Found {} pending cookies from an earlier session; pushing.",
            queued.len()
        ));
        self.sync.manual_push().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineBuilder;
    use crate::host::MemoryCookieStore;
    use crate::loader::MockSilentLoader;
    use crate::sync::SettingsUpdate;
    use crate::transport::MockRemote;
    use crate::{Alarm, Engine, EngineEvents};
    use chrono::Utc;
    use cookiesync_protocol::{
        ChangeSource, CookieRecord, IdentityKey, RenewalStatus, StoredSettings,
    };
    use cookiesync_storage::{InMemoryStore, KeyValueStore};

    fn engine_over(store: Arc<InMemoryStore>) -> (Engine, EngineEvents, Arc<MockRemote>) {
        let remote = Arc::new(MockRemote::new());
        let (engine, events) = EngineBuilder::new(store)
            .remote(remote.clone())
            .cookie_store(Arc::new(MemoryCookieStore::new()))
            .silent_loader(Arc::new(MockSilentLoader::new()))
            .build()
            .unwrap();
        (engine, events, remote)
    }

    fn record_stat(engine: &Engine, key: &IdentityKey) {
        engine
            .state()
            .update(Bucket::Stats, |book: &mut StatsBook| {
                book.record(
                    key,
                    RenewalStatus::Success,
                    ChangeSource::KeepAlive,
                    None,
                    Utc::now(),
                    20,
                );
            })
            .unwrap();
    }

    #[tokio::test]
    async fn integrity_check_drops_orphaned_stats() {
        let (engine, _events, _remote) = engine_over(Arc::new(InMemoryStore::new()));
        let kept = CookieRecord::new("a", "example.com", "/", "1");
        let gone = CookieRecord::new("b", "example.com", "/", "2");
        engine
            .sync()
            .stage_change(vec![kept.clone(), gone.clone()])
            .unwrap();
        record_stat(&engine, &kept.identity_key());
        record_stat(&engine, &gone.identity_key());

        engine.sync().remove_cookie(&gone.identity_key()).unwrap();
        let report = engine.maintenance().integrity_check().unwrap();
        assert_eq!(
            report,
            IntegrityReport {
                orphans_removed: 1,
                monitored: 1
            }
        );
        let stats: StatsBook = engine.state().load(Bucket::Stats).unwrap();
        assert!(stats.get(&gone.identity_key()).is_none());
        assert!(stats.get(&kept.identity_key()).is_some());
    }

    #[tokio::test]
    async fn corrupted_list_aborts_without_writing() {
        let store = Arc::new(InMemoryStore::new());
        store.set("syncList", br#"{"not":"an array"}"#).unwrap();
        store.set("keepAliveStats", br#"{}"#).unwrap();
        let (engine, _events, _remote) = engine_over(store.clone());

        let err = engine.maintenance().integrity_check().unwrap_err();
        assert!(matches!(err, SyncError::Corrupted(_)));
        assert_eq!(
            store.get("syncList").unwrap().unwrap(),
            br#"{"not":"an array"}"#.to_vec()
        );
        let last = &engine.log().entries().unwrap()[0];
        assert!(last.message.starts_with("Integrity check aborted"));
    }

    #[tokio::test]
    async fn export_then_import_restores_state() {
        let (engine, _events, _remote) = engine_over(Arc::new(InMemoryStore::new()));
        engine
            .sync()
            .stage_change(vec![CookieRecord::new("a", "example.com", "/", "1")])
            .unwrap();
        engine
            .sync()
            .configure(SettingsUpdate {
                keep_alive_frequency: Some(10),
                ..SettingsUpdate::default()
            })
            .unwrap();
        let backup = engine.maintenance().export_all().unwrap();
        assert_eq!(backup.sync_list.as_ref().unwrap().len(), 1);

        let (other, _events, _remote) = engine_over(Arc::new(InMemoryStore::new()));
        other.import_all(backup).unwrap();
        assert_eq!(other.sync().sync_list().unwrap().len(), 1);
        let settings: StoredSettings = other.state().load(Bucket::Settings).unwrap();
        assert_eq!(settings.keep_alive_frequency, Some(10));
        assert!(other
            .watcher()
            .is_monitored(&IdentityKey::new("a", "example.com", "/")));
        assert!(other.alarms().get(Alarm::KeepAlive).is_some());
    }

    #[tokio::test]
    async fn incomplete_backup_is_rejected_before_clearing() {
        let (engine, _events, _remote) = engine_over(Arc::new(InMemoryStore::new()));
        engine
            .sync()
            .stage_change(vec![CookieRecord::new("a", "example.com", "/", "1")])
            .unwrap();

        let err = engine.import_all(Backup::default()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
        assert_eq!(engine.sync().sync_list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_pushes_leftover_queue() {
        let (engine, _events, remote) = engine_over(Arc::new(InMemoryStore::new()));
        assert_eq!(engine.maintenance().recover_pending().await.unwrap(), None);

        engine
            .sync()
            .configure(SettingsUpdate {
                api_endpoint: Some("https://sync.example.com".into()),
                auth_token: Some("t".into()),
                keep_alive_frequency: None,
            })
            .unwrap();
        engine
            .state()
            .save(
                Bucket::RetryQueue,
                &SyncList::from_records([CookieRecord::new("a", "example.com", "/", "1")]),
            )
            .unwrap();

        let outcome = engine.maintenance().recover_pending().await.unwrap();
        assert_eq!(outcome, Some(PushOutcome::Pushed { count: 1 }));
        assert_eq!(remote.pushes().len(), 1);
    }
}
