//! Error types shared by the fingerprint engine and path resolution

use std::path::PathBuf;
use thiserror::Error;

/// Failure to produce a directory fingerprint
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Root could not be read at all
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root exists but is not a directory
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// An entry below the root failed mid-walk
    #[error("walk failed below {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Content hashing failed (content-hash mode only)
    #[error("cannot hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to turn a stored watch target into a usable directory
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("watch target {0} no longer exists")]
    Missing(PathBuf),

    #[error("watch target {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("watch target {path} is stale: {reason}")]
    Stale { path: PathBuf, reason: String },
}
