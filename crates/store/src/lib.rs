//! Watcher persistence
//!
//! This crate provides:
//! - The `WatchStore` trait the watcher facade persists through
//! - `JsonStore`, a single JSON document replaced atomically on every write
//! - `MemoryStore`, for embedding and tests

pub mod json;
pub mod memory;

use settle_core::{Watcher, WatcherId};
use std::path::PathBuf;
use thiserror::Error;

// Re-exports
pub use json::JsonStore;
pub use memory::MemoryStore;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt watcher file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported watcher file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

/// Persistent set of watcher configurations
pub trait WatchStore: Send + Sync {
    /// Every stored watcher, in creation order
    fn load_all(&self) -> Result<Vec<Watcher>>;

    /// Insert or replace by id
    fn save(&self, watcher: &Watcher) -> Result<()>;

    /// Remove by id; false when nothing was stored under it
    fn delete(&self, id: &WatcherId) -> Result<bool>;
}

impl<S: WatchStore + ?Sized> WatchStore for std::sync::Arc<S> {
    fn load_all(&self) -> Result<Vec<Watcher>> {
        (**self).load_all()
    }

    fn save(&self, watcher: &Watcher) -> Result<()> {
        (**self).save(watcher)
    }

    fn delete(&self, id: &WatcherId) -> Result<bool> {
        (**self).delete(id)
    }
}

/// Insert or replace a watcher in a list, keeping creation order
pub(crate) fn upsert(watchers: &mut Vec<Watcher>, watcher: &Watcher) {
    match watchers.iter_mut().find(|w| w.id == watcher.id) {
        Some(existing) => *existing = watcher.clone(),
        None => watchers.push(watcher.clone()),
    }
}
