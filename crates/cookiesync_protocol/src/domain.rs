//! Domain matching and registrable-domain grouping.
//!
//! A leading dot on a cookie domain is ignored only here, for containment
//! checks and grouping. Identity keys keep the domain verbatim.

use std::collections::HashSet;

/// Two-level public suffixes known to the default grouper.
pub const KNOWN_TWO_LEVEL_SUFFIXES: &[&str] =
    &["com.cn", "org.cn", "net.cn", "gov.cn", "co.uk", "co.jp"];

/// Strips one leading `.` from a cookie domain.
pub fn strip_leading_dot(domain: &str) -> &str {
    domain.strip_prefix('.').unwrap_or(domain)
}

/// Returns true if a cookie set for `cookie_domain` applies to `host`.
///
/// Matches when the host equals the cookie domain or is a subdomain of it.
/// Comparison is case-insensitive.
pub fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let cookie_domain = strip_leading_dot(cookie_domain).to_ascii_lowercase();
    host == cookie_domain || host.ends_with(&format!(".{cookie_domain}"))
}

/// URL used to address a cookie of the given domain in the host cookie store.
pub fn cookie_url(domain: &str) -> String {
    format!("https://{}/", strip_leading_dot(domain))
}

/// Maps a cookie domain to the key used to batch silent page loads.
///
/// Implement this to substitute a full public-suffix-list lookup.
pub trait DomainGrouper: Send + Sync {
    /// Returns the grouping key (approximate eTLD+1) of `domain`.
    fn group(&self, domain: &str) -> String;
}

/// Heuristic eTLD+1 based on a small set of two-level suffixes.
#[derive(Debug, Clone)]
pub struct SuffixListGrouper {
    two_level: HashSet<String>,
}

impl SuffixListGrouper {
    /// Creates a grouper with the given two-level suffixes.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            two_level: suffixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SuffixListGrouper {
    fn default() -> Self {
        Self::new(KNOWN_TWO_LEVEL_SUFFIXES.iter().copied())
    }
}

impl DomainGrouper for SuffixListGrouper {
    fn group(&self, domain: &str) -> String {
        let domain = strip_leading_dot(domain);
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() <= 2 {
            return domain.to_string();
        }
        let last_two = labels[labels.len() - 2..].join(".");
        if self.two_level.contains(&last_two) {
            labels[labels.len() - 3..].join(".")
        } else {
            last_two
        }
    }
}

/// Groups `domain` with the default [`SuffixListGrouper`].
pub fn registrable_domain(domain: &str) -> String {
    SuffixListGrouper::default().group(domain)
}
