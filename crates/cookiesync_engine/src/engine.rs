//! Engine assembly.
//!
//! [`EngineBuilder`] wires the persistent state, the activity log, the
//! alarm scheduler and the debounce scheduler to the host collaborators and
//! produces an [`Engine`] plus the [`EngineEvents`] its timers fire on.

use crate::alarm::{Alarm, AlarmScheduler};
use crate::config::EngineConfig;
use crate::crypto::CredentialCipher;
use crate::debounce::DebounceScheduler;
use crate::error::{SyncError, SyncResult};
use crate::host::CookieStore;
use crate::keepalive::KeepAliveEngine;
use crate::loader::SilentLoader;
use crate::log::ActivityLog;
use crate::maintenance::{IntegrityReport, Maintenance};
use crate::persist::PersistentState;
use crate::sync::SyncEngine;
use crate::transport::RemoteApi;
use crate::watcher::ChangeWatcher;
use cookiesync_protocol::{Backup, DomainGrouper, SuffixListGrouper};
use cookiesync_storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// State shared by every component of one engine.
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) state: Arc<PersistentState>,
    pub(crate) log: ActivityLog,
    pub(crate) alarms: Arc<AlarmScheduler>,
}

/// Receivers of the engine's timer events.
///
/// The service loop owns these; tests may poll them directly.
#[derive(Debug)]
pub struct EngineEvents {
    /// Fired alarms.
    pub alarms: mpsc::UnboundedReceiver<Alarm>,
    /// One message per closed debounce window.
    pub debounce: mpsc::UnboundedReceiver<()>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn KeyValueStore>,
    config: EngineConfig,
    remote: Option<Arc<dyn RemoteApi>>,
    cookies: Option<Arc<dyn CookieStore>>,
    loader: Option<Arc<dyn SilentLoader>>,
    grouper: Arc<dyn DomainGrouper>,
}

impl EngineBuilder {
    /// Starts a builder over `store` with the default configuration.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            remote: None,
            cookies: None,
            loader: None,
            grouper: Arc::new(SuffixListGrouper::default()),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the remote API client.
    pub fn remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the host cookie store.
    pub fn cookie_store(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// Sets the silent page loader.
    pub fn silent_loader(mut self, loader: Arc<dyn SilentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replaces the registrable-domain grouping rule.
    pub fn grouper(mut self, grouper: Arc<dyn DomainGrouper>) -> Self {
        self.grouper = grouper;
        self
    }

    /// Assembles the engine.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a collaborator is missing or the
    /// credential secret is empty.
    pub fn build(self) -> SyncResult<(Engine, EngineEvents)> {
        let remote = self
            .remote
            .ok_or_else(|| SyncError::Configuration("remote API is not set".into()))?;
        let cookies = self
            .cookies
            .ok_or_else(|| SyncError::Configuration("cookie store is not set".into()))?;
        let loader = self
            .loader
            .ok_or_else(|| SyncError::Configuration("silent loader is not set".into()))?;
        let cipher = Arc::new(CredentialCipher::from_secret(&self.config.credential_secret)?);

        let config = Arc::new(self.config);
        let state = Arc::new(PersistentState::new(self.store));
        let log = ActivityLog::new(Arc::clone(&state), config.log_capacity);
        let (alarms, alarm_rx) = AlarmScheduler::new();
        let shared = Shared {
            config: Arc::clone(&config),
            state,
            log,
            alarms: Arc::new(alarms),
        };

        let (debounce_tx, debounce_rx) = mpsc::unbounded_channel();
        let debounce = Arc::new(DebounceScheduler::new(
            config.debounce_window,
            Arc::new(move || {
                // The service may already be gone.
                let _ = debounce_tx.send(());
            }),
        ));

        let sync = Arc::new(SyncEngine::new(
            shared.clone(),
            debounce,
            remote,
            cipher,
            Arc::clone(&self.grouper),
        ));
        let keep_alive = Arc::new(KeepAliveEngine::new(
            shared.clone(),
            Arc::clone(&cookies),
            loader,
            self.grouper,
            Arc::clone(&sync),
        ));
        let watcher = Arc::new(ChangeWatcher::new(shared.clone(), Arc::clone(&sync)));
        let maintenance = Arc::new(Maintenance::new(shared.clone(), Arc::clone(&sync)));

        if let Err(e) = watcher.refresh() {
            tracing::warn!(error = %e, "initial monitored set could not be loaded");
        }

        let engine = Engine {
            shared,
            cookies,
            sync,
            keep_alive,
            watcher,
            maintenance,
        };
        let events = EngineEvents {
            alarms: alarm_rx,
            debounce: debounce_rx,
        };
        Ok((engine, events))
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("remote", &self.remote.is_some())
            .field("cookies", &self.cookies.is_some())
            .field("loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

/// A fully wired CookieSync engine.
///
/// Cloning is cheap; clones share every component.
#[derive(Clone)]
pub struct Engine {
    shared: Shared,
    cookies: Arc<dyn CookieStore>,
    sync: Arc<SyncEngine>,
    keep_alive: Arc<KeepAliveEngine>,
    watcher: Arc<ChangeWatcher>,
    maintenance: Arc<Maintenance>,
}

impl Engine {
    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the persistent state.
    pub fn state(&self) -> &Arc<PersistentState> {
        &self.shared.state
    }

    /// Returns the activity log.
    pub fn log(&self) -> &ActivityLog {
        &self.shared.log
    }

    /// Returns the alarm scheduler.
    pub fn alarms(&self) -> &Arc<AlarmScheduler> {
        &self.shared.alarms
    }

    /// Returns the host cookie store.
    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    /// Returns the sync engine.
    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Returns the keep-alive engine.
    pub fn keep_alive(&self) -> &Arc<KeepAliveEngine> {
        &self.keep_alive
    }

    /// Returns the change watcher.
    pub fn watcher(&self) -> &Arc<ChangeWatcher> {
        &self.watcher
    }

    /// Returns the maintenance operations.
    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    /// Replaces all user data with `backup`, then refreshes the monitored
    /// set, re-arms the keep-alive alarm and re-runs the integrity check.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] if the backup lacks a required
    /// field, or a storage error.
    pub fn import_all(&self, backup: Backup) -> SyncResult<IntegrityReport> {
        self.maintenance.import_all(backup)?;
        self.watcher.refresh()?;
        self.keep_alive.setup_alarm()?;
        self.maintenance.integrity_check()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryCookieStore;
    use crate::loader::MockSilentLoader;
    use crate::transport::MockRemote;
    use cookiesync_storage::InMemoryStore;

    #[tokio::test]
    async fn missing_collaborator_is_configuration_error() {
        let err = EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(Arc::new(MemoryCookieStore::new()))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn empty_secret_is_rejected() {
        let err = EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .config(EngineConfig::new().with_credential_secret(""))
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(Arc::new(MemoryCookieStore::new()))
            .silent_loader(Arc::new(MockSilentLoader::new()))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let (engine, _events) = EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(Arc::new(MemoryCookieStore::new()))
            .silent_loader(Arc::new(MockSilentLoader::new()))
            .build()
            .unwrap();
        let other = engine.clone();
        engine.log().info("hello");
        assert_eq!(other.log().entries().unwrap()[0].message, "hello");
    }
}
