//! Watcher file persisted as one JSON document

use crate::{upsert, Result, StoreError, WatchStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use settle_core::{Watcher, WatcherId};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct WatcherFile {
    version: u32,
    watchers: Vec<Watcher>,
}

/// JSON-file backed store
///
/// Every write re-reads the file, applies the change and atomically replaces
/// the document, so edits made by another process between two writes are
/// preserved.
pub struct JsonStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open a store at `path`; the file is created on first write
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        // Fail early on a corrupt or future-version file
        store.read()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Watcher>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: WatcherFile =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if file.version != FORMAT_VERSION {
            return Err(StoreError::Version {
                found: file.version,
                expected: FORMAT_VERSION,
            });
        }

        Ok(file.watchers)
    }

    fn write(&self, watchers: Vec<Watcher>) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let file = WatcherFile {
            version: FORMAT_VERSION,
            watchers,
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Write next to the target, fsync, then rename over it
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        tracing::debug!("Wrote {} watchers to {}", file.watchers.len(), self.path.display());
        Ok(())
    }
}

impl WatchStore for JsonStore {
    fn load_all(&self) -> Result<Vec<Watcher>> {
        self.read()
    }

    fn save(&self, watcher: &Watcher) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut watchers = self.read()?;
        upsert(&mut watchers, watcher);
        self.write(watchers)
    }

    fn delete(&self, id: &WatcherId) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut watchers = self.read()?;
        let before = watchers.len();
        watchers.retain(|w| &w.id != id);
        if watchers.len() == before {
            return Ok(false);
        }
        self.write(watchers)?;
        Ok(true)
    }
}
