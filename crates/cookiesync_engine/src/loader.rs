//! Silent page loads that give sites a chance to renew their cookies.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A URL whose load did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// The URL.
    pub url: String,
    /// Why it failed, including timeouts.
    pub reason: String,
}

/// Outcome of one batch of silent loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// URLs that loaded.
    pub loaded: Vec<String>,
    /// URLs that errored or timed out.
    pub failed: Vec<LoadFailure>,
}

/// Loads pages invisibly.
///
/// `load_all` returns once every URL has loaded, errored or timed out; that
/// return is the batch's completion signal.
#[async_trait]
pub trait SilentLoader: Send + Sync {
    /// Returns true while a batch is in flight.
    fn is_busy(&self) -> bool;

    /// Loads every URL in one batch.
    async fn load_all(&self, urls: Vec<String>) -> SyncResult<LoadReport>;
}

/// Clears a busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::Host("silent loader is busy".into()))?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Silent loader issuing concurrent HTTP GETs.
#[derive(Debug)]
pub struct HttpSilentLoader {
    client: Client,
    timeout: Duration,
    busy: AtomicBool,
}

impl HttpSilentLoader {
    /// Creates a loader with a per-URL `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::Host(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            busy: AtomicBool::new(false),
        })
    }

    async fn load_one(&self, url: String) -> Result<String, LoadFailure> {
        let request = self.client.get(&url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_)) => Ok(url),
            Ok(Err(e)) => Err(LoadFailure {
                reason: e.to_string(),
                url,
            }),
            Err(_) => Err(LoadFailure {
                reason: format!("timed out after {:?}", self.timeout),
                url,
            }),
        }
    }
}

#[async_trait]
impl SilentLoader for HttpSilentLoader {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn load_all(&self, urls: Vec<String>) -> SyncResult<LoadReport> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        tracing::debug!(count = urls.len(), "starting silent loads");

        let mut report = LoadReport::default();
        for outcome in join_all(urls.into_iter().map(|url| self.load_one(url))).await {
            match outcome {
                Ok(url) => report.loaded.push(url),
                Err(failure) => report.failed.push(failure),
            }
        }
        Ok(report)
    }
}

/// Hook run by [`MockSilentLoader`] while a batch is in flight.
pub type LoadHook = Arc<dyn Fn(&[String]) + Send + Sync>;

/// A silent loader for testing.
///
/// Records batches and runs an optional hook, e.g. to renew cookies in a
/// [`crate::MemoryCookieStore`] as a real page load would.
pub struct MockSilentLoader {
    busy: AtomicBool,
    batches: Mutex<Vec<Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    hook: Mutex<Option<LoadHook>>,
}

impl MockSilentLoader {
    /// Creates an idle loader.
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            batches: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            hook: Mutex::new(None),
        }
    }

    /// Forces the busy flag.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Makes loads of `url` fail.
    pub fn fail_url(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }

    /// Sets the hook run on every batch.
    pub fn on_load(&self, hook: LoadHook) {
        *self.hook.lock() = Some(hook);
    }

    /// Returns every batch, oldest first.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

impl Default for MockSilentLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockSilentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSilentLoader")
            .field("busy", &self.is_busy())
            .field("batches", &self.batches.lock().len())
            .finish()
    }
}

#[async_trait]
impl SilentLoader for MockSilentLoader {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    async fn load_all(&self, urls: Vec<String>) -> SyncResult<LoadReport> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        self.batches.lock().push(urls.clone());

        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(&urls);
        }

        let failing = self.failing.lock().clone();
        let mut report = LoadReport::default();
        for url in urls {
            if failing.contains(&url) {
                report.failed.push(LoadFailure {
                    url,
                    reason: "injected failure".into(),
                });
            } else {
                report.loaded.push(url);
            }
        }
        Ok(report)
    }
}
