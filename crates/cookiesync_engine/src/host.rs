//! The host cookie store.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cookiesync_protocol::{domain_matches, CookieRecord, IdentityKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;
use url::Url;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Why a cookie changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// Set or removed by a page, script or the user.
    Explicit,
    /// Overwritten by a later set.
    Overwrite,
    /// Removed because it expired.
    Expired,
    /// Evicted by garbage collection.
    Evicted,
    /// Overwritten with an already-expired expiration.
    ExpiredOverwrite,
}

/// A live cookie-change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieChange {
    /// The cookie after the change, or the removed cookie.
    pub cookie: CookieRecord,
    /// Whether the cookie was removed.
    pub removed: bool,
    /// Why it changed.
    pub cause: ChangeCause,
}

/// Access to the browser's live cookies.
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Returns the cookie named `name` that applies to `url`.
    async fn get(&self, url: &str, name: &str) -> SyncResult<Option<CookieRecord>>;

    /// Returns every cookie whose domain applies to `domain`.
    async fn get_all(&self, domain: &str) -> SyncResult<Vec<CookieRecord>>;

    /// Subscribes to live cookie changes.
    fn subscribe(&self) -> broadcast::Receiver<CookieChange>;
}

/// An in-memory cookie jar standing in for the browser.
///
/// Every mutation is published on the change feed.
#[derive(Debug)]
pub struct MemoryCookieStore {
    cookies: RwLock<Vec<CookieRecord>>,
    unreadable: RwLock<HashSet<String>>,
    changes: broadcast::Sender<CookieChange>,
}

impl MemoryCookieStore {
    /// Creates an empty jar.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            cookies: RwLock::new(Vec::new()),
            unreadable: RwLock::new(HashSet::new()),
            changes,
        }
    }

    /// Sets a cookie with cause `Explicit`.
    pub fn set(&self, cookie: CookieRecord) {
        self.set_with_cause(cookie, ChangeCause::Explicit);
    }

    /// Sets a cookie, replacing the one with the same identity.
    pub fn set_with_cause(&self, cookie: CookieRecord, cause: ChangeCause) {
        {
            let mut cookies = self.cookies.write();
            let key = cookie.identity_key();
            match cookies.iter_mut().find(|c| c.identity_key() == key) {
                Some(existing) => *existing = cookie.clone(),
                None => cookies.push(cookie.clone()),
            }
        }
        let _ = self.changes.send(CookieChange {
            cookie,
            removed: false,
            cause,
        });
    }

    /// Sets a cookie without publishing a change.
    pub fn insert_silently(&self, cookie: CookieRecord) {
        let mut cookies = self.cookies.write();
        let key = cookie.identity_key();
        cookies.retain(|c| c.identity_key() != key);
        cookies.push(cookie);
    }

    /// Removes a cookie. Returns true if it existed.
    pub fn remove(&self, key: &IdentityKey, cause: ChangeCause) -> bool {
        let removed = {
            let mut cookies = self.cookies.write();
            cookies
                .iter()
                .position(|c| &c.identity_key() == key)
                .map(|i| cookies.remove(i))
        };
        match removed {
            Some(cookie) => {
                let _ = self.changes.send(CookieChange {
                    cookie,
                    removed: true,
                    cause,
                });
                true
            }
            None => false,
        }
    }

    /// Makes reads of cookies named `name` fail.
    pub fn make_unreadable(&self, name: impl Into<String>) {
        self.unreadable.write().insert(name.into());
    }

    /// Undoes [`make_unreadable`](Self::make_unreadable).
    pub fn make_readable(&self, name: &str) {
        self.unreadable.write().remove(name);
    }

    /// Returns a copy of every cookie.
    pub fn all(&self) -> Vec<CookieRecord> {
        self.cookies.read().clone()
    }
}

impl Default for MemoryCookieStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn get(&self, url: &str, name: &str) -> SyncResult<Option<CookieRecord>> {
        if self.unreadable.read().contains(name) {
            return Err(SyncError::Host(format!("cookie {name} is unreadable")));
        }
        let url = Url::parse(url).map_err(|e| SyncError::InvalidRequest(format!("{url}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| SyncError::InvalidRequest(format!("{url} has no host")))?;
        let path = url.path();

        // Longest matching path first, like the browser.
        Ok(self
            .cookies
            .read()
            .iter()
            .filter(|c| c.name == name && domain_matches(host, &c.domain))
            .filter(|c| path.starts_with(&c.path))
            .max_by_key(|c| c.path.len())
            .cloned())
    }

    async fn get_all(&self, domain: &str) -> SyncResult<Vec<CookieRecord>> {
        let domain = cookiesync_protocol::strip_leading_dot(domain);
        Ok(self
            .cookies
            .read()
            .iter()
            .filter(|c| domain_matches(cookiesync_protocol::strip_leading_dot(&c.domain), domain))
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<CookieChange> {
        self.changes.subscribe()
    }
}
