//! # CookieSync Engine
//!
//! Sync, retry and keep-alive engine for CookieSync.
//!
//! This crate provides:
//! - Bucketed persistent state with a change feed
//! - Debounced, durable pushes to the remote sync API
//! - Fixed-interval retry of failed pushes
//! - Keep-alive cycles that renew monitored cookies
//! - Live change watching for monitored cookies
//! - Integrity checks, backup and startup recovery
//! - A command dispatcher and the long-running service loop
//!
//! ## Architecture
//!
//! Cookie changes, keep-alive renewals and explicit staging all merge into
//! the sync list and arm a 15 second debounce window. When the window
//! closes, the sync list is combined with the retry queue, the combination
//! is persisted as the new queue, and only then POSTed:
//! 1. Persist intent (retry queue)
//! 2. Push to the remote
//! 3. Clear the queue and the retry alarm on success, or re-arm the retry
//!
//! The host (cookie store, silent page loads, the remote API) is reached
//! through traits so tests can substitute in-memory collaborators.
//!
//! ## Key Invariants
//!
//! - The retry queue is written before every network push
//! - The retry alarm is cancelled only after a confirmed push
//! - At most one keep-alive cycle is in flight
//! - Merges of one identity apply in arrival order
//! - The monitored set follows every write of the sync list

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alarm;
mod command;
mod config;
mod crypto;
mod debounce;
mod engine;
mod error;
mod host;
mod http;
mod keepalive;
mod loader;
mod log;
mod maintenance;
mod persist;
mod service;
mod sync;
mod transport;
mod watcher;

pub use alarm::{Alarm, AlarmInfo, AlarmScheduler};
pub use command::{Command, Reply, Response};
pub use config::{parse_base_url, EngineConfig, Endpoint, DEFAULT_CREDENTIAL_SECRET};
pub use crypto::CredentialCipher;
pub use debounce::{DebounceCallback, DebounceScheduler};
pub use engine::{Engine, EngineBuilder, EngineEvents};
pub use error::{SyncError, SyncResult};
pub use host::{ChangeCause, CookieChange, CookieStore, MemoryCookieStore};
pub use http::HttpRemote;
pub use keepalive::{CycleOutcome, CycleReport, KeepAliveEngine, SkipReason};
pub use loader::{
    HttpSilentLoader, LoadFailure, LoadHook, LoadReport, MockSilentLoader, SilentLoader,
};
pub use log::ActivityLog;
pub use maintenance::{IntegrityReport, Maintenance};
pub use persist::{Bucket, PersistentState};
pub use service::{CookieSyncService, ServiceHandle};
pub use sync::{PushOutcome, RemovalSummary, SettingsUpdate, SettingsView, SyncEngine};
pub use transport::{MockRemote, RemoteApi};
pub use watcher::{ChangeWatcher, WatchOutcome};
