//! Remote API abstraction.

use crate::config::Endpoint;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cookiesync_protocol::{ApiCookie, UserSettings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// The remote sync API.
///
/// Implementations validate the response envelope: a method returns `Ok`
/// only for a 2xx status with `code == 200`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Replaces the user's cookies on the remote (`POST {base}/sync`).
    async fn push(&self, endpoint: &Endpoint, cookies: &[ApiCookie]) -> SyncResult<()>;

    /// Verifies connectivity and the token (`GET {base}/auth/test`).
    async fn test_auth(&self, endpoint: &Endpoint) -> SyncResult<()>;

    /// Fetches the user's settings (`GET {base}/user/settings`).
    async fn user_settings(&self, endpoint: &Endpoint) -> SyncResult<UserSettings>;

    /// Updates the user's settings (`PUT {base}/user/settings`).
    async fn update_user_settings(
        &self,
        endpoint: &Endpoint,
        settings: UserSettings,
    ) -> SyncResult<()>;
}

/// An in-process remote for testing.
#[derive(Debug)]
pub struct MockRemote {
    online: AtomicBool,
    token_valid: AtomicBool,
    failing_pushes: AtomicUsize,
    sharing_enabled: AtomicBool,
    pushes: Mutex<Vec<Vec<ApiCookie>>>,
}

impl MockRemote {
    /// Creates an online remote accepting every request.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            token_valid: AtomicBool::new(true),
            failing_pushes: AtomicUsize::new(0),
            sharing_enabled: AtomicBool::new(false),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Sets whether requests reach the remote.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Sets whether the token is accepted.
    pub fn set_token_valid(&self, valid: bool) {
        self.token_valid.store(valid, Ordering::SeqCst);
    }

    /// Makes the next `count` pushes fail with a server error.
    pub fn fail_next_pushes(&self, count: usize) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    /// Returns every accepted push payload, oldest first.
    pub fn pushes(&self) -> Vec<Vec<ApiCookie>> {
        self.pushes.lock().clone()
    }

    /// Returns the last accepted push payload.
    pub fn last_push(&self) -> Option<Vec<ApiCookie>> {
        self.pushes.lock().last().cloned()
    }

    /// Returns the current sharing flag.
    pub fn sharing_enabled(&self) -> bool {
        self.sharing_enabled.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("remote unreachable".into()));
        }
        if !self.token_valid.load(Ordering::SeqCst) {
            return Err(SyncError::Remote {
                status: 401,
                message: "authentication failed".into(),
            });
        }
        Ok(())
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn push(&self, _endpoint: &Endpoint, cookies: &[ApiCookie]) -> SyncResult<()> {
        self.check()?;
        let failing = self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Remote {
                status: 500,
                message: "injected failure".into(),
            });
        }
        self.pushes.lock().push(cookies.to_vec());
        Ok(())
    }

    async fn test_auth(&self, _endpoint: &Endpoint) -> SyncResult<()> {
        self.check()
    }

    async fn user_settings(&self, _endpoint: &Endpoint) -> SyncResult<UserSettings> {
        self.check()?;
        Ok(UserSettings {
            sharing_enabled: self.sharing_enabled(),
        })
    }

    async fn update_user_settings(
        &self,
        _endpoint: &Endpoint,
        settings: UserSettings,
    ) -> SyncResult<()> {
        self.check()?;
        self.sharing_enabled
            .store(settings.sharing_enabled, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookiesync_protocol::CookieRecord;

    fn endpoint() -> Endpoint {
        Endpoint::new("https://sync.example.com/api/v1", "token").unwrap()
    }

    #[tokio::test]
    async fn mock_records_pushes() {
        let remote = MockRemote::new();
        let cookie = ApiCookie::from_record(
            &CookieRecord::new("sid", "a.com", "/", "v"),
            chrono::Utc::now(),
        );
        remote.push(&endpoint(), &[cookie]).await.unwrap();
        assert_eq!(remote.pushes().len(), 1);
        assert_eq!(remote.last_push().unwrap()[0].name, "sid");
    }

    #[tokio::test]
    async fn mock_offline_is_retryable() {
        let remote = MockRemote::new();
        remote.set_online(false);
        let err = remote.push(&endpoint(), &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(remote.pushes().is_empty());
    }

    #[tokio::test]
    async fn mock_injected_failures_run_out() {
        let remote = MockRemote::new();
        remote.fail_next_pushes(1);
        assert!(remote.push(&endpoint(), &[]).await.is_err());
        assert!(remote.push(&endpoint(), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn mock_invalid_token() {
        let remote = MockRemote::new();
        remote.set_token_valid(false);
        let err = remote.test_auth(&endpoint()).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: 401, .. }));
    }
}
