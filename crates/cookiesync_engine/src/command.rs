//! The closed set of operations callers can request, and their dispatch.
//!
//! Commands arrive as JSON objects tagged with an `action` field, e.g.
//! `{"action":"removeCookie","key":"sid|.example.com|/"}`. Every command
//! yields a [`Response`]; failures never escape as errors.

use crate::engine::Engine;
use crate::error::{SyncError, SyncResult};
use crate::maintenance::IntegrityReport;
use crate::sync::{PushOutcome, RemovalSummary, SettingsUpdate, SettingsView};
use cookiesync_protocol::{
    Backup, CookieRecord, IdentityKey, LogEntry, LogLevel, StageSummary, StatsBook, SyncList,
    UserSettings,
};
use serde::{Deserialize, Serialize};

/// An operation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Merge cookies into the sync list.
    StageCookies {
        /// Records to merge.
        cookies: Vec<CookieRecord>,
    },
    /// Read the live cookies of a domain from the host.
    CookiesForDomain {
        /// Domain to query.
        domain: String,
    },
    /// Remove one cookie from the sync list.
    RemoveCookie {
        /// Identity to remove.
        key: IdentityKey,
    },
    /// Remove every cookie of a registrable domain.
    RemoveDomain {
        /// Registrable domain.
        domain: String,
    },
    /// Replace the sync list and push.
    ReplaceSyncList {
        /// The new list.
        list: SyncList,
    },
    /// Set a cookie's local remark.
    UpdateRemark {
        /// Identity to annotate.
        key: IdentityKey,
        /// The remark.
        remark: String,
    },
    /// Push now.
    ManualPush,
    /// Verify connectivity and credentials.
    TestConnection,
    /// Fetch remote user settings.
    GetUserSettings,
    /// Update remote user settings.
    UpdateUserSettings {
        /// Whether sharing is enabled.
        sharing_enabled: bool,
    },
    /// Read the activity log.
    GetLogs,
    /// Clear the activity log.
    ClearLogs,
    /// Append to the activity log.
    AddLog {
        /// Message.
        message: String,
        /// Severity.
        #[serde(default, rename = "type")]
        level: LogLevel,
    },
    /// Read statistics with live cookie values.
    KeepAliveStats,
    /// Export all user data.
    ExportAll,
    /// Replace all user data.
    ImportAll {
        /// The backup to restore.
        backup: Backup,
    },
    /// Run the integrity check.
    IntegrityCheck,
    /// Read the sync list.
    GetSyncList,
    /// Change local settings.
    SaveSettings {
        /// Fields to change.
        settings: SettingsUpdate,
    },
    /// Read local settings.
    GetSettings,
}

impl Command {
    /// The action name used on the wire and in log messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StageCookies { .. } => "stageCookies",
            Command::CookiesForDomain { .. } => "cookiesForDomain",
            Command::RemoveCookie { .. } => "removeCookie",
            Command::RemoveDomain { .. } => "removeDomain",
            Command::ReplaceSyncList { .. } => "replaceSyncList",
            Command::UpdateRemark { .. } => "updateRemark",
            Command::ManualPush => "manualPush",
            Command::TestConnection => "testConnection",
            Command::GetUserSettings => "getUserSettings",
            Command::UpdateUserSettings { .. } => "updateUserSettings",
            Command::GetLogs => "getLogs",
            Command::ClearLogs => "clearLogs",
            Command::AddLog { .. } => "addLog",
            Command::KeepAliveStats => "keepAliveStats",
            Command::ExportAll => "exportAll",
            Command::ImportAll { .. } => "importAll",
            Command::IntegrityCheck => "integrityCheck",
            Command::GetSyncList => "getSyncList",
            Command::SaveSettings { .. } => "saveSettings",
            Command::GetSettings => "getSettings",
        }
    }
}

/// Payload of a successful command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// No payload.
    None,
    /// Staging summary.
    Staged(StageSummary),
    /// Removal summary.
    Removed(RemovalSummary),
    /// Push outcome.
    Pushed(PushOutcome),
    /// One cookie.
    Cookie(CookieRecord),
    /// Several cookies.
    Cookies(Vec<CookieRecord>),
    /// Remote user settings.
    UserSettings(UserSettings),
    /// Activity log, newest first.
    Logs(Vec<LogEntry>),
    /// Keep-alive statistics.
    Stats(StatsBook),
    /// Exported data.
    Backup(Box<Backup>),
    /// Integrity check result.
    Integrity(IntegrityReport),
    /// The sync list.
    SyncList(SyncList),
    /// Local settings.
    Settings(SettingsView),
}

impl Reply {
    fn is_none(&self) -> bool {
        matches!(self, Reply::None)
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub success: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Payload.
    #[serde(rename = "data", skip_serializing_if = "Reply::is_none")]
    pub reply: Reply,
}

impl Response {
    /// A successful response.
    pub fn ok(reply: Reply) -> Self {
        Self {
            success: true,
            error: None,
            reply,
        }
    }

    /// A failed response carrying the error message.
    pub fn failed(error: &SyncError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            reply: Reply::None,
        }
    }
}

impl Engine {
    /// Executes `command`, converting any failure into a failed response
    /// and an activity log entry.
    pub async fn dispatch(&self, command: Command) -> Response {
        let action = command.name();
        tracing::debug!(action, "dispatching command");
        match self.execute(command).await {
            Ok(reply) => Response::ok(reply),
            Err(e) => {
                self.log().error(format!("{action} failed: {e}"));
                Response::failed(&e)
            }
        }
    }

    async fn execute(&self, command: Command) -> SyncResult<Reply> {
        let sync = self.sync();
        let reply = match command {
            Command::StageCookies { cookies } => Reply::Staged(sync.stage_change(cookies)?),
            Command::CookiesForDomain { domain } => {
                Reply::Cookies(self.cookies().get_all(&domain).await?)
            }
            Command::RemoveCookie { key } => Reply::Removed(sync.remove_cookie(&key)?),
            Command::RemoveDomain { domain } => Reply::Removed(sync.remove_domain(&domain)?),
            Command::ReplaceSyncList { list } => Reply::Pushed(sync.replace_sync_list(list).await?),
            Command::UpdateRemark { key, remark } => {
                Reply::Cookie(sync.update_remark(&key, remark)?)
            }
            Command::ManualPush => Reply::Pushed(sync.manual_push().await?),
            Command::TestConnection => {
                sync.test_connection().await?;
                Reply::None
            }
            Command::GetUserSettings => Reply::UserSettings(sync.user_settings().await?),
            Command::UpdateUserSettings { sharing_enabled } => {
                Reply::UserSettings(sync.set_sharing(sharing_enabled).await?)
            }
            Command::GetLogs => Reply::Logs(self.log().entries()?),
            Command::ClearLogs => {
                self.log().clear()?;
                Reply::None
            }
            Command::AddLog { message, level } => {
                self.log().append(level, message);
                Reply::None
            }
            Command::KeepAliveStats => {
                Reply::Stats(self.keep_alive().stats_with_live_values().await?)
            }
            Command::ExportAll => Reply::Backup(Box::new(self.maintenance().export_all()?)),
            Command::ImportAll { backup } => Reply::Integrity(self.import_all(backup)?),
            Command::IntegrityCheck => Reply::Integrity(self.maintenance().integrity_check()?),
            Command::GetSyncList => Reply::SyncList(sync.sync_list()?),
            Command::SaveSettings { settings } => Reply::Settings(sync.configure(settings)?),
            Command::GetSettings => Reply::Settings(sync.settings()?),
        };
        Ok(reply)
    }
}
