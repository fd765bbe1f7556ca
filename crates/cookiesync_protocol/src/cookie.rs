//! Cookie records and their identity.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The `SameSite` attribute as reported by the browser cookie store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    /// `SameSite=None`.
    NoRestriction,
    /// `SameSite=Lax`.
    Lax,
    /// `SameSite=Strict`.
    Strict,
    /// The browser did not report a value.
    #[default]
    Unspecified,
}

impl SameSite {
    /// Returns the wire name of this value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::NoRestriction => "no_restriction",
            SameSite::Lax => "lax",
            SameSite::Strict => "strict",
            SameSite::Unspecified => "unspecified",
        }
    }
}

/// One browser cookie of interest.
///
/// `expiration_date`, `is_sharable` and `remark` are optional: `None` means
/// the source of the record did not supply the field, which matters for
/// [`CookieRecord::merge`]. `is_sharable` and `remark` are local-only
/// annotations that never come from the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    /// Cookie domain. A leading dot marks a domain cookie.
    pub domain: String,
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    #[serde(default)]
    pub value: String,
    /// Cookie path.
    #[serde(default = "default_path")]
    pub path: String,
    /// `HttpOnly` flag.
    #[serde(default)]
    pub http_only: bool,
    /// `Secure` flag.
    #[serde(default)]
    pub secure: bool,
    /// `SameSite` attribute.
    #[serde(default)]
    pub same_site: SameSite,
    /// Expiration in epoch seconds. `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    /// Whether the cookie may be offered to the sharing pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sharable: Option<bool>,
    /// Free-form local annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl CookieRecord {
    /// Creates a record with the given identity and value and default attributes.
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            value: value.into(),
            path: path.into(),
            http_only: false,
            secure: false,
            same_site: SameSite::Unspecified,
            expiration_date: None,
            is_sharable: None,
            remark: None,
        }
    }

    /// Sets the expiration date.
    pub fn with_expiration(mut self, epoch_seconds: f64) -> Self {
        self.expiration_date = Some(epoch_seconds);
        self
    }

    /// Sets the local remark.
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Sets the sharable flag.
    pub fn with_sharable(mut self, sharable: bool) -> Self {
        self.is_sharable = Some(sharable);
        self
    }

    /// Returns the identity key `name|domain|path`.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.name, &self.domain, &self.path)
    }

    /// Whether the cookie is offered to the sharing pool. Defaults to false.
    pub fn is_sharable(&self) -> bool {
        self.is_sharable.unwrap_or(false)
    }

    /// Merges `incoming` over `existing`.
    ///
    /// Every field the incoming record supplies wins. Optional fields the
    /// incoming record leaves unset keep the existing value, so a live
    /// browser cookie never erases local annotations.
    pub fn merge(existing: &CookieRecord, incoming: CookieRecord) -> CookieRecord {
        CookieRecord {
            expiration_date: incoming.expiration_date.or(existing.expiration_date),
            is_sharable: incoming.is_sharable.or(existing.is_sharable),
            remark: incoming.remark.or_else(|| existing.remark.clone()),
            ..incoming
        }
    }
}

/// Identity of a logical cookie: the exact string `name|domain|path`.
///
/// The domain takes part verbatim, so `.example.com` and `example.com` are
/// distinct identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Builds the key from its three parts.
    pub fn new(name: &str, domain: &str, path: &str) -> Self {
        Self(format!("{name}|{domain}|{path}"))
    }

    /// Wraps an already formatted key string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the key back into `(name, domain, path)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidIdentityKey`] if the key does not have
    /// three `|`-separated parts.
    pub fn parts(&self) -> ProtocolResult<(&str, &str, &str)> {
        let mut it = self.0.splitn(3, '|');
        match (it.next(), it.next(), it.next()) {
            (Some(name), Some(domain), Some(path)) => Ok((name, domain, path)),
            _ => Err(ProtocolError::InvalidIdentityKey(self.0.clone())),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&CookieRecord> for IdentityKey {
    fn from(record: &CookieRecord) -> Self {
        record.identity_key()
    }
}
