//! Persisted tuning results.
//!
//! The store maps tuning keys to the fastest measured [`LocalWorkSize`]. It
//! lives in memory and is optionally backed by a JSON file written
//! atomically through a temporary file and rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tilekernel_core::error::{Result, TileKernelError};

use super::{LocalWorkSize, TuningKey};

/// Current store format version. Files with another version are ignored.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, LocalWorkSize>,
}

/// Tuning-key to local-size table.
#[derive(Debug, Default)]
pub struct TuningStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, LocalWorkSize>>,
    dirty: AtomicBool,
}

impl TuningStore {
    /// Creates an empty store with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store backed by `path`.
    ///
    /// A missing file yields an empty store. An unreadable or malformed file
    /// is an error; a file from another format version is ignored, as are
    /// entries with a zero extent or partition count.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => {
                let file: StoreFile =
                    serde_json::from_str(&contents).map_err(|e| store_error(&path, e))?;
                if file.version == STORE_VERSION {
                    let mut entries = file.entries;
                    entries.retain(|key, lws| {
                        let usable = lws.is_usable();
                        if !usable {
                            tracing::warn!(
                                path = %path.display(),
                                tuning_key = %key,
                                lws = %lws,
                                "Dropping unusable tuning entry"
                            );
                        }
                        usable
                    });
                    entries
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        version = file.version,
                        "Ignoring tuning store with unknown version"
                    );
                    BTreeMap::new()
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(store_error(&path, e)),
        };

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Opened tuning store"
        );

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stored local size for `key`.
    pub fn lookup(&self, key: &TuningKey) -> Option<LocalWorkSize> {
        self.entries.read().get(key.as_str()).copied()
    }

    /// Records `lws` as the tuned local size for `key`.
    pub fn record(&self, key: &TuningKey, lws: LocalWorkSize) {
        let previous = self.entries.write().insert(key.as_str().to_string(), lws);
        if previous != Some(lws) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether entries changed since the last load or persist.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Writes the store to its backing file. No-op without one.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Clear under the lock so a concurrent record re-marks the store.
        let entries = {
            let guard = self.entries.read();
            self.dirty.store(false, Ordering::Release);
            guard.clone()
        };
        let file = StoreFile {
            version: STORE_VERSION,
            entries,
        };

        if let Err(e) = write_atomically(path, &file) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            entries = file.entries.len(),
            "Persisted tuning store"
        );
        Ok(())
    }
}

fn write_atomically(path: &Path, file: &StoreFile) -> Result<()> {
    let json = serde_json::to_string_pretty(file).map_err(|e| store_error(path, e))?;

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|e| store_error(path, e))?;
        }
    }

    let temp_path = path.with_extension("json.tmp");
    let mut temp = fs::File::create(&temp_path).map_err(|e| store_error(path, e))?;
    temp.write_all(json.as_bytes())
        .map_err(|e| store_error(path, e))?;
    temp.sync_all().map_err(|e| store_error(path, e))?;
    drop(temp);
    fs::rename(&temp_path, path).map_err(|e| store_error(path, e))
}

fn store_error(path: &Path, err: impl std::fmt::Display) -> TileKernelError {
    TileKernelError::TuningStore {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
