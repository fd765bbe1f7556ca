//! # CookieSync Storage
//!
//! Key/value store trait and implementations for CookieSync.
//!
//! This crate provides the lowest-level persistence abstraction. Stores
//! are **opaque byte stores** keyed by bucket name - they do not interpret
//! the values they hold.
//!
//! ## Design Principles
//!
//! - One value per key, always written wholesale
//! - A read observes either the previous or the new value, never a mix
//! - Must be `Send + Sync` for shared access
//! - The engine owns all value formats
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - One file per key in a directory, survives restarts
//!
//! ## Example
//!
//! ```rust
//! use cookiesync_storage::{KeyValueStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("syncList", b"[]").unwrap();
//! assert_eq!(store.get("syncList").unwrap().as_deref(), Some(&b"[]"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, KeyValueStore};
