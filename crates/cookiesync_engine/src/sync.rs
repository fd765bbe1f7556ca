//! Push-to-remote with a durable retry queue.
//!
//! A push combines the sync list with the retry queue (list entries win),
//! persists the combination as the new queue, then POSTs it. The queue is
//! cleared and the retry alarm cancelled only after the remote accepts the
//! push; any other failure re-arms a one-shot retry.

use crate::alarm::Alarm;
use crate::config::{parse_base_url, Endpoint};
use crate::crypto::CredentialCipher;
use crate::debounce::DebounceScheduler;
use crate::engine::Shared;
use crate::error::{SyncError, SyncResult};
use crate::log::describe_duration;
use crate::persist::Bucket;
use crate::transport::RemoteApi;
use chrono::Utc;
use cookiesync_protocol::{
    ApiCookie, CookieRecord, DomainGrouper, IdentityKey, StageSummary, StoredSettings, SyncList,
    UserSettings,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a push attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum PushOutcome {
    /// Nothing to push; the queue was cleared.
    Empty,
    /// The remote accepted `count` cookies.
    Pushed {
        /// Number of cookies sent.
        count: usize,
    },
}

/// Result of removing cookies from the sync list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalSummary {
    /// Number of records removed.
    pub removed: usize,
    /// Size of the list afterwards.
    pub total: usize,
}

/// Partial settings change. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    /// New API base URL.
    pub api_endpoint: Option<String>,
    /// New plaintext token; stored encrypted.
    pub auth_token: Option<String>,
    /// New keep-alive period in minutes.
    pub keep_alive_frequency: Option<u32>,
}

/// Stored settings without the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    /// API base URL.
    pub api_endpoint: Option<String>,
    /// Whether a token is stored.
    pub has_token: bool,
    /// Keep-alive period in minutes.
    pub keep_alive_frequency: Option<u32>,
}

impl From<&StoredSettings> for SettingsView {
    fn from(settings: &StoredSettings) -> Self {
        Self {
            api_endpoint: settings.api_endpoint.clone(),
            has_token: settings.auth_token.is_some(),
            keep_alive_frequency: settings.keep_alive_frequency,
        }
    }
}

/// Orchestrates the sync list, the retry queue and the remote.
pub struct SyncEngine {
    shared: Shared,
    debounce: Arc<DebounceScheduler>,
    remote: Arc<dyn RemoteApi>,
    cipher: Arc<CredentialCipher>,
    grouper: Arc<dyn DomainGrouper>,
    push_gate: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub(crate) fn new(
        shared: Shared,
        debounce: Arc<DebounceScheduler>,
        remote: Arc<dyn RemoteApi>,
        cipher: Arc<CredentialCipher>,
        grouper: Arc<dyn DomainGrouper>,
    ) -> Self {
        Self {
            shared,
            debounce,
            remote,
            cipher,
            grouper,
            push_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolves the stored settings into a usable endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings are incomplete or the
    /// token cannot be decrypted.
    pub fn endpoint(&self) -> SyncResult<Endpoint> {
        let settings: StoredSettings = self.shared.state.load(Bucket::Settings)?;
        Endpoint::resolve(&settings, &self.cipher)
    }

    /// Returns the current sync list.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync list cannot be read.
    pub fn sync_list(&self) -> SyncResult<SyncList> {
        self.shared.state.load(Bucket::SyncList)
    }

    /// Returns the pending retry queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn retry_queue(&self) -> SyncResult<SyncList> {
        self.shared.state.load(Bucket::RetryQueue)
    }

    /// Arms the debounce window, logging only when a new window opens.
    pub fn schedule_sync(&self) {
        if self.debounce.notify() {
            self.shared.log.info(format!(
                "Sync window opened; changes in the next {} will be pushed together.",
                describe_duration(self.debounce.window())
            ));
        }
    }

    /// Merges `records` into the sync list and arms the debounce window.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync list cannot be updated.
    pub fn stage_change(&self, records: Vec<CookieRecord>) -> SyncResult<StageSummary> {
        if records.is_empty() {
            let total = self.sync_list()?.len();
            return Ok(StageSummary { added: 0, total });
        }
        let summary = self
            .shared
            .state
            .update(Bucket::SyncList, |list: &mut SyncList| list.stage(records))?;
        self.shared.log.success(format!(
            "Sync list updated: {} added, {} total.",
            summary.added, summary.total
        ));
        self.schedule_sync();
        Ok(summary)
    }

    /// Pushes the sync list combined with the retry queue.
    ///
    /// On a retryable failure, a retry alarm is (re)armed and the staged
    /// data stays in the queue.
    ///
    /// # Errors
    ///
    /// Returns the failure of the attempt.
    pub async fn push_now(&self) -> SyncResult<PushOutcome> {
        let _gate = self.push_gate.lock().await;
        match self.try_push().await {
            Ok(outcome) => Ok(outcome),
            Err(e) if !e.is_retryable() => {
                self.shared.log.error(format!("Push failed: {e}"));
                Err(e)
            }
            Err(e) => {
                let delay = self.shared.config.retry_delay;
                self.shared.log.error(format!(
                    "Push failed: {e}. Data is staged and will be retried in {}.",
                    describe_duration(delay)
                ));
                self.shared.alarms.create_once(Alarm::SyncRetry, delay);
                Err(e)
            }
        }
    }

    /// Explicit user-triggered push.
    ///
    /// # Errors
    ///
    /// Returns the failure of the attempt.
    pub async fn manual_push(&self) -> SyncResult<PushOutcome> {
        self.shared.log.info("Manual push started.");
        self.push_now().await
    }

    async fn try_push(&self) -> SyncResult<PushOutcome> {
        let endpoint = self.endpoint()?;
        let list = self.sync_list()?;
        let queued = self.retry_queue()?;
        let to_sync = list.union_with(&queued);

        if to_sync.is_empty() {
            self.shared.log.info("Sync list is empty; skipping push.");
            self.shared.state.remove(Bucket::RetryQueue)?;
            return Ok(PushOutcome::Empty);
        }

        // Durable intent before the network call.
        self.shared.state.save(Bucket::RetryQueue, &to_sync)?;

        let now = Utc::now();
        let payload: Vec<ApiCookie> = to_sync
            .iter()
            .map(|record| ApiCookie::from_record(record, now))
            .collect();
        self.remote.push(&endpoint, &payload).await?;

        self.shared.state.remove(Bucket::RetryQueue)?;
        self.shared.alarms.clear(Alarm::SyncRetry);
        self.shared
            .log
            .success(format!("Pushed {} cookies to the remote.", to_sync.len()));
        Ok(PushOutcome::Pushed {
            count: to_sync.len(),
        })
    }

    /// Removes one cookie from the sync list and arms the debounce window.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the identity is not in the list.
    pub fn remove_cookie(&self, key: &IdentityKey) -> SyncResult<RemovalSummary> {
        let (removed, total) =
            self.shared
                .state
                .try_update(Bucket::SyncList, |list: &mut SyncList| {
                    let removed = list.remove(key);
                    let changed = removed.is_some();
                    Ok(((removed, list.len()), changed))
                })?;
        let record = removed.ok_or_else(|| SyncError::NotFound(key.to_string()))?;

        self.shared
            .log
            .info(format!("Removed {} from the sync list.", record.name));
        self.schedule_sync();
        Ok(RemovalSummary { removed: 1, total })
    }

    /// Removes every cookie whose registrable domain is `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no cookie belongs to the domain.
    pub fn remove_domain(&self, domain: &str) -> SyncResult<RemovalSummary> {
        let grouper = Arc::clone(&self.grouper);
        let summary = self
            .shared
            .state
            .try_update(Bucket::SyncList, |list: &mut SyncList| {
                let removed = list.remove_where(|c| grouper.group(&c.domain) == domain);
                let summary = RemovalSummary {
                    removed,
                    total: list.len(),
                };
                Ok((summary, removed > 0))
            })?;
        if summary.removed == 0 {
            return Err(SyncError::NotFound(format!("no cookies for domain {domain}")));
        }

        self.shared.log.info(format!(
            "Removed domain {domain} ({} cookies) from the sync list.",
            summary.removed
        ));
        self.schedule_sync();
        Ok(summary)
    }

    /// Sets the local remark of a cookie. Nothing is pushed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the identity is not in the list.
    pub fn update_remark(&self, key: &IdentityKey, remark: String) -> SyncResult<CookieRecord> {
        let updated = self
            .shared
            .state
            .try_update(Bucket::SyncList, |list: &mut SyncList| {
                let updated = list.get_mut(key).map(|record| {
                    record.remark = Some(remark);
                    record.clone()
                });
                let changed = updated.is_some();
                Ok((updated, changed))
            })?
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;

        self.shared
            .log
            .info(format!("Local remark of {} updated.", updated.name));
        Ok(updated)
    }

    /// Replaces the whole sync list and pushes immediately.
    ///
    /// # Errors
    ///
    /// Returns the failure of the push.
    pub async fn replace_sync_list(&self, list: SyncList) -> SyncResult<PushOutcome> {
        let list = SyncList::from_records(list.into_records());
        self.shared.state.save(Bucket::SyncList, &list)?;
        self.shared
            .log
            .info(format!("Sync list replaced ({} cookies).", list.len()));
        self.push_now().await
    }

    /// Verifies connectivity and credentials.
    ///
    /// # Errors
    ///
    /// Returns a configuration, transport or remote error.
    pub async fn test_connection(&self) -> SyncResult<()> {
        let endpoint = self.endpoint()?;
        self.remote.test_auth(&endpoint).await?;
        self.shared
            .log
            .success("API connection and authentication test succeeded.");
        Ok(())
    }

    /// Fetches the user's remote settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration, transport or remote error.
    pub async fn user_settings(&self) -> SyncResult<UserSettings> {
        let endpoint = self.endpoint()?;
        self.remote.user_settings(&endpoint).await
    }

    /// Enables or disables sharing on the remote.
    ///
    /// # Errors
    ///
    /// Returns a configuration, transport or remote error.
    pub async fn set_sharing(&self, enabled: bool) -> SyncResult<UserSettings> {
        let endpoint = self.endpoint()?;
        let settings = UserSettings {
            sharing_enabled: enabled,
        };
        self.remote.update_user_settings(&endpoint, settings).await?;
        self.shared.log.success(format!(
            "Remote sharing {}.",
            if enabled { "enabled" } else { "disabled" }
        ));
        Ok(settings)
    }

    /// Applies a settings change, encrypting a new token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid endpoint or token.
    pub fn configure(&self, update: SettingsUpdate) -> SyncResult<SettingsView> {
        if let Some(endpoint) = &update.api_endpoint {
            parse_base_url(endpoint)?;
        }
        let encrypted = update
            .auth_token
            .as_deref()
            .map(|token| self.cipher.encrypt_token(token))
            .transpose()?;

        let view = self
            .shared
            .state
            .update(Bucket::Settings, |settings: &mut StoredSettings| {
                if let Some(endpoint) = update.api_endpoint {
                    settings.api_endpoint = Some(endpoint);
                }
                if let Some(token) = encrypted {
                    settings.auth_token = Some(token);
                }
                if let Some(minutes) = update.keep_alive_frequency {
                    settings.keep_alive_frequency = Some(minutes);
                }
                SettingsView::from(&*settings)
            })?;
        self.shared.log.info("Settings saved.");
        Ok(view)
    }

    /// Returns the stored settings without the token.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read.
    pub fn settings(&self) -> SyncResult<SettingsView> {
        let settings: StoredSettings = self.shared.state.load(Bucket::Settings)?;
        Ok(SettingsView::from(&settings))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}
