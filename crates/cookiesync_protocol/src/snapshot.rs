//! Before/after snapshots of live cookies and their classification.

use crate::cookie::CookieRecord;
use serde::{Deserialize, Serialize};

/// The renewal-relevant state of a live cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSnapshot {
    /// Cookie value.
    pub value: String,
    /// Expiration in epoch seconds, 0 for session cookies.
    pub expiration_date: f64,
}

impl CookieSnapshot {
    /// Creates a snapshot.
    pub fn new(value: impl Into<String>, expiration_date: f64) -> Self {
        Self {
            value: value.into(),
            expiration_date,
        }
    }
}

impl From<&CookieRecord> for CookieSnapshot {
    fn from(record: &CookieRecord) -> Self {
        Self {
            value: record.value.clone(),
            expiration_date: record.expiration_date.unwrap_or(0.0),
        }
    }
}

/// Outcome of one keep-alive evaluation of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenewalStatus {
    /// The cookie was renewed: later expiration or new value.
    Success,
    /// The cookie disappeared or could not be read.
    Failure,
    /// The cookie is present and unchanged.
    NoChange,
}

impl RenewalStatus {
    /// Returns the serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RenewalStatus::Success => "success",
            RenewalStatus::Failure => "failure",
            RenewalStatus::NoChange => "no-change",
        }
    }
}

/// Classifies a cookie from its pre-refresh snapshot and its live state afterwards.
///
/// `after == None` means the cookie is gone. A renewal is a strictly later
/// expiration or a changed value.
pub fn classify(before: &CookieSnapshot, after: Option<&CookieSnapshot>) -> RenewalStatus {
    match after {
        None => RenewalStatus::Failure,
        Some(after) => {
            let extended = after.expiration_date > before.expiration_date;
            let rotated = after.value != before.value;
            if extended || rotated {
                RenewalStatus::Success
            } else {
                RenewalStatus::NoChange
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_cookie() {
        let before = CookieSnapshot::new("a", 100.0);
        let after = CookieSnapshot::new("a", 100.0);
        assert_eq!(classify(&before, Some(&after)), RenewalStatus::NoChange);
    }

    #[test]
    fn rotated_value_is_success() {
        let before = CookieSnapshot::new("a", 100.0);
        let after = CookieSnapshot::new("b", 100.0);
        assert_eq!(classify(&before, Some(&after)), RenewalStatus::Success);
    }

    #[test]
    fn extended_expiry_is_success() {
        let before = CookieSnapshot::new("a", 100.0);
        assert_eq!(
            classify(&before, Some(&CookieSnapshot::new("a", 160.0))),
            RenewalStatus::Success
        );
        // An earlier expiry alone is not a renewal.
        assert_eq!(
            classify(&before, Some(&CookieSnapshot::new("a", 50.0))),
            RenewalStatus::NoChange
        );
    }

    #[test]
    fn missing_cookie_is_failure() {
        let before = CookieSnapshot::new("a", 100.0);
        assert_eq!(classify(&before, None), RenewalStatus::Failure);
    }

    #[test]
    fn status_names() {
        assert_eq!(
            serde_json::to_string(&RenewalStatus::NoChange).unwrap(),
            "\"no-change\""
        );
        assert_eq!(RenewalStatus::Failure.as_str(), "failure");
    }
}
