//! Persisted user settings and the backup document.

use crate::error::{ProtocolError, ProtocolResult};
use crate::log::LogBook;
use crate::stats::StatsBook;
use crate::sync_list::SyncList;
use serde::{Deserialize, Serialize};

/// Settings as stored in the `syncSettings` bucket.
///
/// `auth_token` holds the encrypted token, never the plaintext.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    /// Base URL of the remote API, e.g. `https://sync.example.com/api/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    /// Encrypted API token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Keep-alive period in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_frequency: Option<u32>,
}

/// Export/import document covering the user-owned buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    /// Activity log.
    #[serde(rename = "cookieSyncerLogs", default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogBook>,
    /// Sync list.
    #[serde(rename = "syncList", default, skip_serializing_if = "Option::is_none")]
    pub sync_list: Option<SyncList>,
    /// Keep-alive statistics.
    #[serde(rename = "keepAliveStats", default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsBook>,
    /// Settings.
    #[serde(rename = "syncSettings", default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<StoredSettings>,
}

impl Backup {
    /// Checks that the fields required for an import are present.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingBackupField`] naming the first missing field.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.sync_list.is_none() {
            return Err(ProtocolError::MissingBackupField("syncList"));
        }
        if self.settings.is_none() {
            return Err(ProtocolError::MissingBackupField("syncSettings"));
        }
        Ok(())
    }
}
