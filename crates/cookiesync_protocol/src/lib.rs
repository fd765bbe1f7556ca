//! # CookieSync Protocol
//!
//! Data model and wire types for CookieSync.
//!
//! This crate provides:
//! - `CookieRecord` with its `name|domain|path` identity and merge rule
//! - `SyncList`, the deduplicated list of cookies kept alive and mirrored
//! - Registrable-domain grouping for batching silent page loads
//! - Snapshot classification for keep-alive cycles
//! - Statistics and activity-log records
//! - JSON payloads of the remote sync API
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - A sync list holds at most one record per identity key
//! - Merging never drops a local annotation the incoming record does not supply
//! - A leading dot on a domain matters for identity, not for containment

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cookie;
mod domain;
mod error;
mod log;
mod settings;
mod snapshot;
mod stats;
mod sync_list;
mod wire;

pub use cookie::{CookieRecord, IdentityKey, SameSite};
pub use domain::{
    cookie_url, domain_matches, registrable_domain, strip_leading_dot, DomainGrouper,
    SuffixListGrouper, KNOWN_TWO_LEVEL_SUFFIXES,
};
pub use error::{ProtocolError, ProtocolResult};
pub use log::{LogBook, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
pub use settings::{Backup, StoredSettings};
pub use snapshot::{classify, CookieSnapshot, RenewalStatus};
pub use stats::{ChangeSource, StatEntry, StatHistory, StatsBook, DEFAULT_STAT_HISTORY};
pub use sync_list::{StageSummary, SyncList};
pub use wire::{ApiCookie, ApiResponse, UserSettings, AUTH_OK_MESSAGE, CODE_OK};
