//! JSON payloads exchanged with the remote sync API.

use crate::cookie::CookieRecord;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The `code` value of an accepted response.
pub const CODE_OK: i64 = 200;

/// Confirmation message returned by `GET /auth/test` for a valid token.
pub const AUTH_OK_MESSAGE: &str = "Token is valid";

/// A cookie as sent to `POST /sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCookie {
    /// Cookie domain, verbatim.
    pub domain: String,
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Cookie path.
    pub path: String,
    /// `HttpOnly` flag.
    pub http_only: bool,
    /// `Secure` flag.
    pub secure: bool,
    /// `SameSite` attribute name.
    pub same_site: String,
    /// Whether the cookie may be shared with other users.
    pub is_sharable: bool,
    /// Expiration, `null` for session cookies.
    pub expires: Option<DateTime<Utc>>,
    /// When this payload was produced.
    pub last_updated_from_extension_at: DateTime<Utc>,
}

impl ApiCookie {
    /// Converts a record into its wire form, stamped with `now`.
    pub fn from_record(record: &CookieRecord, now: DateTime<Utc>) -> Self {
        Self {
            domain: record.domain.clone(),
            name: record.name.clone(),
            value: record.value.clone(),
            path: record.path.clone(),
            http_only: record.http_only,
            secure: record.secure,
            same_site: record.same_site.as_str().to_string(),
            is_sharable: record.is_sharable(),
            expires: record.expiration_date.and_then(epoch_to_datetime),
            last_updated_from_extension_at: now,
        }
    }
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if seconds <= 0.0 || !seconds.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((seconds * 1000.0) as i64).single()
}

/// Standard response envelope of the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Application status code, 200 on success.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: CODE_OK,
            message: message.into(),
            data,
        }
    }

    /// Returns true if `code` is 200.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Per-user server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserSettings {
    /// Whether the user's sharable cookies join the sharing pool.
    pub sharing_enabled: bool,
}
