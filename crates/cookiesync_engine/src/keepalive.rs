//! Keep-alive cycles.
//!
//! A cycle snapshots every monitored cookie, silently loads one page per
//! registrable domain, then re-reads each cookie and classifies the change.
//! Renewed cookies are merged back into the sync list and the debounce
//! window is armed so the renewal reaches the remote.

use crate::alarm::Alarm;
use crate::engine::Shared;
use crate::error::SyncResult;
use crate::host::CookieStore;
use crate::loader::{LoadFailure, SilentLoader};
use crate::log::describe_duration;
use crate::persist::Bucket;
use crate::sync::SyncEngine;
use chrono::Utc;
use cookiesync_protocol::{
    classify, cookie_url, ChangeSource, CookieRecord, CookieSnapshot, DomainGrouper, IdentityKey,
    RenewalStatus, StatsBook, StoredSettings, SyncList,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another cycle or silent-load batch is in flight.
    InFlight,
    /// Nothing is monitored.
    EmptyList,
}

/// Counts of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Identities in the pre-snapshot.
    pub checked: usize,
    /// Identities classified as renewed.
    pub renewed: usize,
    /// Identities classified as unchanged.
    pub unchanged: usize,
    /// Identities that disappeared or could not be read.
    pub failed: usize,
    /// Registrable domains loaded.
    pub domains: usize,
    /// Silent loads that errored or timed out.
    #[serde(skip)]
    pub load_failures: Vec<LoadFailure>,
}

/// Result of [`KeepAliveEngine::run_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle did not run.
    Skipped(SkipReason),
    /// The cycle ran to completion.
    Completed(CycleReport),
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Address used to read a monitored cookie from the host.
fn lookup_url(record: &CookieRecord) -> String {
    let base = cookie_url(&record.domain);
    match record.path.strip_prefix('/') {
        Some(path) => format!("{base}{path}"),
        None => base,
    }
}

/// Periodically refreshes monitored cookies.
pub struct KeepAliveEngine {
    shared: Shared,
    cookies: Arc<dyn CookieStore>,
    loader: Arc<dyn SilentLoader>,
    grouper: Arc<dyn DomainGrouper>,
    sync: Arc<SyncEngine>,
    in_flight: AtomicBool,
}

impl KeepAliveEngine {
    pub(crate) fn new(
        shared: Shared,
        cookies: Arc<dyn CookieStore>,
        loader: Arc<dyn SilentLoader>,
        grouper: Arc<dyn DomainGrouper>,
        sync: Arc<SyncEngine>,
    ) -> Self {
        Self {
            shared,
            cookies,
            loader,
            grouper,
            sync,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Returns true while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs one keep-alive cycle.
    ///
    /// Skips without queuing if a cycle or a silent-load batch is already in
    /// flight, or if the sync list is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if persistent state cannot be read or written, or
    /// the silent loader rejects the batch. Unreadable cookies and failed
    /// page loads are not errors.
    pub async fn run_cycle(&self) -> SyncResult<CycleOutcome> {
        let log = &self.shared.log;
        if self.loader.is_busy() {
            log.error("Keep-alive cycle already in progress; skipping.");
            return Ok(CycleOutcome::Skipped(SkipReason::InFlight));
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            log.error("Keep-alive cycle already in progress; skipping.");
            return Ok(CycleOutcome::Skipped(SkipReason::InFlight));
        };

        let list = self.sync.sync_list()?;
        if list.is_empty() {
            log.info("Sync list is empty; skipping keep-alive.");
            return Ok(CycleOutcome::Skipped(SkipReason::EmptyList));
        }
        log.info(format!("Keep-alive cycle started for {} cookies.", list.len()));

        let before = self.snapshot(&list).await;

        let domains: BTreeSet<String> = list
            .iter()
            .map(|record| self.grouper.group(&record.domain))
            .collect();
        let urls: Vec<String> = domains.iter().map(|d| cookie_url(d)).collect();
        let load = self.loader.load_all(urls).await?;
        for failure in &load.failed {
            log.error(format!(
                "Silent load of {} failed: {}",
                failure.url, failure.reason
            ));
        }

        let mut report = CycleReport {
            checked: before.len(),
            domains: domains.len(),
            load_failures: load.failed,
            ..CycleReport::default()
        };
        let mut evaluations = Vec::with_capacity(before.len());
        let mut updated = Vec::new();

        for (key, snapshot) in &before {
            let Some(staged) = list.get(key) else {
                continue;
            };
            let (status, error) = match self.cookies.get(&lookup_url(staged), &staged.name).await {
                Ok(Some(live)) => {
                    let status = classify(snapshot, Some(&CookieSnapshot::from(&live)));
                    if status == RenewalStatus::Success {
                        updated.push((key.clone(), live));
                    }
                    (status, None)
                }
                Ok(None) => (
                    classify(snapshot, None),
                    Some("cookie is no longer present".to_string()),
                ),
                Err(e) => (RenewalStatus::Failure, Some(e.to_string())),
            };
            match status {
                RenewalStatus::Success => report.renewed += 1,
                RenewalStatus::NoChange => report.unchanged += 1,
                RenewalStatus::Failure => report.failed += 1,
            }
            evaluations.push((key.clone(), status, error));
        }

        let now = Utc::now();
        let history = self.shared.config.stat_history;
        self.shared
            .state
            .update(Bucket::Stats, |book: &mut StatsBook| {
                for (key, status, error) in evaluations {
                    book.record(&key, status, ChangeSource::KeepAlive, error, now, history);
                }
            })?;

        if !updated.is_empty() {
            let merged = self
                .shared
                .state
                .try_update(Bucket::SyncList, |list: &mut SyncList| {
                    let mut merged = 0;
                    // The list may have changed while pages loaded.
                    for (key, live) in updated {
                        if let Some(current) = list.get(&key) {
                            let renewed = Self::renewed(current, live);
                            list.upsert(renewed);
                            merged += 1;
                        }
                    }
                    Ok((merged, merged > 0))
                })?;
            if merged > 0 {
                log.success(format!("Keep-alive renewed {merged} cookies."));
                self.sync.schedule_sync();
            }
        }

        log.info(format!(
            "Keep-alive cycle finished: {} renewed, {} unchanged, {} failed.",
            report.renewed, report.unchanged, report.failed
        ));
        Ok(CycleOutcome::Completed(report))
    }

    /// Runs a cycle on behalf of the alarm, logging any error as severe.
    pub async fn run_scheduled(&self) -> Option<CycleOutcome> {
        match self.run_cycle().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.shared
                    .log
                    .error(format!("[keep-alive severe failure] {e}"));
                None
            }
        }
    }

    /// Arms the periodic keep-alive alarm from the stored frequency.
    ///
    /// Leaves an alarm with the desired period untouched. Returns true if
    /// the alarm was (re)created.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read.
    pub fn setup_alarm(&self) -> SyncResult<bool> {
        let settings: StoredSettings = self.shared.state.load(Bucket::Settings)?;
        let (period, clamped) = self.shared.config.keep_alive_period(&settings);

        let alarms = &self.shared.alarms;
        if alarms
            .get(Alarm::KeepAlive)
            .is_some_and(|info| info.period == Some(period))
        {
            return Ok(false);
        }

        if clamped {
            self.shared.log.error(format!(
                "Keep-alive frequency is below the minimum; using {}.",
                describe_duration(period)
            ));
        }
        alarms.create_periodic(
            Alarm::KeepAlive,
            self.shared.config.keep_alive_initial_delay,
            period,
        );
        self.shared.log.info(format!(
            "Keep-alive scheduled every {}.",
            describe_duration(period)
        ));
        Ok(true)
    }

    /// Returns the statistics annotated with each cookie's live value and
    /// expiration.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics or the sync list cannot be read.
    pub async fn stats_with_live_values(&self) -> SyncResult<StatsBook> {
        let mut book: StatsBook = self.shared.state.load(Bucket::Stats)?;
        let list = self.sync.sync_list()?;
        for (key, entry) in book.iter_mut() {
            let Some(record) = list.get(key) else {
                continue;
            };
            if let Ok(Some(live)) = self.cookies.get(&lookup_url(record), &record.name).await {
                entry.value = Some(live.value);
                entry.expiration_date = live.expiration_date;
            }
        }
        Ok(book)
    }

    async fn snapshot(&self, list: &SyncList) -> BTreeMap<IdentityKey, CookieSnapshot> {
        let mut before = BTreeMap::new();
        for record in list.iter() {
            match self.cookies.get(&lookup_url(record), &record.name).await {
                Ok(Some(live)) => {
                    before.insert(record.identity_key(), CookieSnapshot::from(&live));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(cookie = %record.identity_key(), error = %e, "pre-snapshot read failed");
                    self.shared.log.error(format!(
                        "Snapshot warning: could not read {}: {e}",
                        record.identity_key()
                    ));
                }
            }
        }
        before
    }

    /// Live fields over the current list entry, keeping its identity and
    /// local annotations.
    fn renewed(current: &CookieRecord, live: CookieRecord) -> CookieRecord {
        CookieRecord {
            name: current.name.clone(),
            domain: current.domain.clone(),
            path: current.path.clone(),
            ..CookieRecord::merge(current, live)
        }
    }
}

impl std::fmt::Debug for KeepAliveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveEngine")
            .field("in_flight", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineBuilder;
    use crate::host::{ChangeCause, MemoryCookieStore};
    use crate::loader::{LoadReport, MockSilentLoader};
    use crate::sync::SettingsUpdate;
    use crate::transport::MockRemote;
    use crate::{Engine, EngineConfig, EngineEvents};
    use cookiesync_protocol::LogLevel;
    use cookiesync_storage::InMemoryStore;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Holds every batch until released.
    #[derive(Default)]
    struct GatedLoader {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl SilentLoader for GatedLoader {
        fn is_busy(&self) -> bool {
            false
        }

        async fn load_all(&self, urls: Vec<String>) -> SyncResult<LoadReport> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(LoadReport {
                loaded: urls,
                failed: Vec::new(),
            })
        }
    }

    struct Fixture {
        engine: Engine,
        _events: EngineEvents,
        jar: Arc<MemoryCookieStore>,
        loader: Arc<MockSilentLoader>,
    }

    fn fixture() -> Fixture {
        let jar = Arc::new(MemoryCookieStore::new());
        let loader = Arc::new(MockSilentLoader::new());
        let (engine, events) = EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .config(EngineConfig::new())
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(jar.clone())
            .silent_loader(loader.clone())
            .build()
            .unwrap();
        Fixture {
            engine,
            _events: events,
            jar,
            loader,
        }
    }

    fn monitor(f: &Fixture, records: Vec<CookieRecord>) {
        for record in &records {
            f.jar.insert_silently(record.clone());
        }
        f.engine
            .state()
            .save(Bucket::SyncList, &SyncList::from_records(records))
            .unwrap();
    }

    #[test]
    fn lookup_url_includes_path() {
        let record = CookieRecord::new("a", ".example.com", "/app", "v");
        assert_eq!(lookup_url(&record), "https://example.com/app");
        let record = CookieRecord::new("a", "example.com", "/", "v");
        assert_eq!(lookup_url(&record), "https://example.com/");
    }

    #[tokio::test]
    async fn empty_list_is_skipped() {
        let f = fixture();
        let outcome = f.engine.keep_alive().run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::EmptyList));
        assert!(f.loader.batches().is_empty());
    }

    #[tokio::test]
    async fn busy_loader_skips_cycle() {
        let f = fixture();
        monitor(&f, vec![CookieRecord::new("a", "example.com", "/", "1")]);
        f.loader.set_busy(true);
        let outcome = f.engine.keep_alive().run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::InFlight));
    }

    #[tokio::test]
    async fn one_load_per_registrable_domain() {
        let f = fixture();
        monitor(
            &f,
            vec![
                CookieRecord::new("a", "www.example.com", "/", "1"),
                CookieRecord::new("b", ".example.com", "/", "2"),
                CookieRecord::new("c", "a.b.co.uk", "/", "3"),
            ],
        );
        f.engine.keep_alive().run_cycle().await.unwrap();
        assert_eq!(
            f.loader.batches(),
            vec![vec![
                "https://b.co.uk/".to_string(),
                "https://example.com/".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn classifies_each_identity() {
        let f = fixture();
        monitor(
            &f,
            vec![
                CookieRecord::new("same", "example.com", "/", "a").with_expiration(100.0),
                CookieRecord::new("rotated", "example.com", "/", "a").with_expiration(100.0),
                CookieRecord::new("gone", "example.com", "/", "a").with_expiration(100.0),
            ],
        );
        let jar = f.jar.clone();
        f.loader.on_load(Arc::new(move |_urls: &[String]| {
            jar.insert_silently(
                CookieRecord::new("rotated", "example.com", "/", "b").with_expiration(100.0),
            );
            jar.remove(
                &IdentityKey::new("gone", "example.com", "/"),
                ChangeCause::Expired,
            );
        }));

        let CycleOutcome::Completed(report) = f.engine.keep_alive().run_cycle().await.unwrap()
        else {
            panic!("cycle did not complete");
        };
        assert_eq!((report.renewed, report.unchanged, report.failed), (1, 1, 1));

        let stats: StatsBook = f.engine.state().load(Bucket::Stats).unwrap();
        let rotated = stats
            .get(&IdentityKey::new("rotated", "example.com", "/"))
            .unwrap();
        assert_eq!(rotated.success_count, 1);
        let same = stats
            .get(&IdentityKey::new("same", "example.com", "/"))
            .unwrap();
        assert_eq!((same.success_count, same.failure_count), (0, 0));
        assert_eq!(same.history.len(), 1);
        let gone = stats
            .get(&IdentityKey::new("gone", "example.com", "/"))
            .unwrap();
        assert_eq!(gone.failure_count, 1);
        assert!(gone.history[0].error.is_some());

        let list = f.engine.sync().sync_list().unwrap();
        let rotated = list
            .get(&IdentityKey::new("rotated", "example.com", "/"))
            .unwrap();
        assert_eq!(rotated.value, "b");
    }

    #[tokio::test]
    async fn renewal_keeps_local_annotations() {
        let f = fixture();
        let staged = CookieRecord::new("sid", ".example.com", "/", "a")
            .with_expiration(100.0)
            .with_remark("main");
        f.engine
            .state()
            .save(Bucket::SyncList, &SyncList::from_records([staged.clone()]))
            .unwrap();
        f.jar.insert_silently(
            CookieRecord::new("sid", ".example.com", "/", "a").with_expiration(100.0),
        );
        let jar = f.jar.clone();
        f.loader.on_load(Arc::new(move |_urls: &[String]| {
            jar.insert_silently(
                CookieRecord::new("sid", ".example.com", "/", "a").with_expiration(200.0),
            );
        }));

        f.engine.keep_alive().run_cycle().await.unwrap();
        let list = f.engine.sync().sync_list().unwrap();
        let record = list.get(&staged.identity_key()).unwrap();
        assert_eq!(record.expiration_date, Some(200.0));
        assert_eq!(record.remark.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn unreadable_cookie_is_excluded_from_snapshot() {
        let f = fixture();
        monitor(&f, vec![CookieRecord::new("locked", "example.com", "/", "a")]);
        f.jar.make_unreadable("locked");

        let CycleOutcome::Completed(report) = f.engine.keep_alive().run_cycle().await.unwrap()
        else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.checked, 0);
        let stats: StatsBook = f.engine.state().load(Bucket::Stats).unwrap();
        assert!(stats.is_empty());

        let entries = f.engine.log().entries().unwrap();
        assert!(entries
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("locked|example.com|/")));
    }

    #[tokio::test]
    async fn remark_edited_during_cycle_survives_renewal() {
        let f = fixture();
        let staged = CookieRecord::new("sid", ".example.com", "/", "a")
            .with_expiration(100.0)
            .with_remark("old");
        f.engine
            .state()
            .save(Bucket::SyncList, &SyncList::from_records([staged.clone()]))
            .unwrap();
        f.jar.insert_silently(
            CookieRecord::new("sid", ".example.com", "/", "a").with_expiration(100.0),
        );
        let jar = f.jar.clone();
        let engine = f.engine.clone();
        let key = staged.identity_key();
        f.loader.on_load(Arc::new(move |_urls: &[String]| {
            engine.sync().update_remark(&key, "new".into()).unwrap();
            jar.insert_silently(
                CookieRecord::new("sid", ".example.com", "/", "a").with_expiration(200.0),
            );
        }));

        f.engine.keep_alive().run_cycle().await.unwrap();
        let list = f.engine.sync().sync_list().unwrap();
        let record = list.get(&staged.identity_key()).unwrap();
        assert_eq!(record.expiration_date, Some(200.0));
        assert_eq!(record.remark.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn severe_failure_is_logged_and_next_cycle_runs() {
        let f = fixture();
        monitor(&f, vec![CookieRecord::new("a", "example.com", "/", "1")]);
        f.engine
            .state()
            .save(Bucket::Stats, &"not a stats map")
            .unwrap();

        let keep_alive = f.engine.keep_alive();
        assert!(keep_alive.run_scheduled().await.is_none());
        assert!(!keep_alive.is_running());
        let entries = f.engine.log().entries().unwrap();
        assert!(entries.iter().any(|e| e.level == LogLevel::Error
            && e.message.starts_with("[keep-alive severe failure]")));

        f.engine.state().remove(Bucket::Stats).unwrap();
        assert!(matches!(
            keep_alive.run_scheduled().await,
            Some(CycleOutcome::Completed(_))
        ));
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let jar = Arc::new(MemoryCookieStore::new());
        let loader = Arc::new(GatedLoader::default());
        let (engine, _events) = EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .remote(Arc::new(MockRemote::new()))
            .cookie_store(jar.clone())
            .silent_loader(loader.clone())
            .build()
            .unwrap();
        let record = CookieRecord::new("a", "example.com", "/", "1");
        jar.insert_silently(record.clone());
        engine
            .state()
            .save(Bucket::SyncList, &SyncList::from_records([record]))
            .unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.keep_alive().run_cycle().await })
        };
        loader.entered.notified().await;
        assert!(engine.keep_alive().is_running());

        let second = engine.keep_alive().run_cycle().await.unwrap();
        assert_eq!(second, CycleOutcome::Skipped(SkipReason::InFlight));
        let skipped = &engine.log().entries().unwrap()[0];
        assert_eq!(skipped.level, LogLevel::Error);
        assert!(skipped.message.contains("already in progress"));

        loader.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, CycleOutcome::Completed(_)));
        assert!(!engine.keep_alive().is_running());
    }

    #[tokio::test]
    async fn load_failures_do_not_fail_identities() {
        let f = fixture();
        monitor(&f, vec![CookieRecord::new("a", "example.com", "/", "1")]);
        f.loader.fail_url("https://example.com/");

        let CycleOutcome::Completed(report) = f.engine.keep_alive().run_cycle().await.unwrap()
        else {
            panic!("cycle did not complete");
        };
        assert_eq!(report.load_failures.len(), 1);
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_setup_is_idempotent() {
        let f = fixture();
        let keep_alive = f.engine.keep_alive();
        assert!(keep_alive.setup_alarm().unwrap());
        assert!(!keep_alive.setup_alarm().unwrap());
        let info = f.engine.alarms().get(Alarm::KeepAlive).unwrap();
        assert_eq!(info.period, Some(Duration::from_secs(60)));

        f.engine
            .sync()
            .configure(SettingsUpdate {
                keep_alive_frequency: Some(30),
                ..SettingsUpdate::default()
            })
            .unwrap();
        assert!(keep_alive.setup_alarm().unwrap());
        let info = f.engine.alarms().get(Alarm::KeepAlive).unwrap();
        assert_eq!(info.period, Some(Duration::from_secs(30 * 60)));
    }

    #[tokio::test]
    async fn live_values_in_stats() {
        let f = fixture();
        let record = CookieRecord::new("a", "example.com", "/", "1");
        monitor(&f, vec![record.clone()]);
        f.engine.keep_alive().run_cycle().await.unwrap();
        f.jar
            .insert_silently(CookieRecord::new("a", "example.com", "/", "live").with_expiration(5.0));

        let book = f.engine.keep_alive().stats_with_live_values().await.unwrap();
        let entry = book.get(&record.identity_key()).unwrap();
        assert_eq!(entry.value.as_deref(), Some("live"));
        assert_eq!(entry.expiration_date, Some(5.0));
    }
}
