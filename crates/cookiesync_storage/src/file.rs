//! Directory-backed key/value store for persistent state.

use crate::error::StorageResult;
use crate::store::{validate_key, KeyValueStore};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const VALUE_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// A file-based key/value store.
///
/// Each key is stored as `<dir>/<key>.json`. Data survives process restarts.
///
/// # Durability
///
/// `set` writes the value to a temporary sibling file, calls
/// `File::sync_all()` and renames it over the target, so a crash leaves
/// either the old or the new value in place.
///
/// # Thread Safety
///
/// This store is thread-safe. Writers are serialized by an internal lock.
///
/// # Example
///
/// ```no_run
/// use cookiesync_storage::{KeyValueStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open_with_create_dirs(Path::new("state")).unwrap();
/// store.set("syncQueue", b"[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at an existing directory.
    ///
    /// Stale temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or cannot be read.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        let store = Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    /// Opens a store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read.
    pub fn open_with_create_dirs(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Self::open(dir)
    }

    /// Returns the store's directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{VALUE_EXTENSION}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{TEMP_EXTENSION}"))
    }

    fn remove_stale_temp_files(&self) -> StorageResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION) {
                tracing::warn!(path = %path.display(), "removing stale temporary file");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let temp = self.temp_path(key);
        {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.value_path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
