//! Turning stored watch targets into directories

use settle_core::{ResolveError, WatchTarget};
use std::path::PathBuf;

/// Resolves a stored watch handle to an absolute directory at use time
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, target: &WatchTarget) -> Result<PathBuf, ResolveError>;
}

/// Resolver for plain filesystem paths
///
/// Expands a leading `~`, canonicalizes, and requires a directory.
#[derive(Debug, Default, Clone)]
pub struct FsResolver;

impl FsResolver {
    fn expand_home(target: &WatchTarget) -> PathBuf {
        let path = target.as_path();
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        path.to_path_buf()
    }
}

impl TargetResolver for FsResolver {
    fn resolve(&self, target: &WatchTarget) -> Result<PathBuf, ResolveError> {
        let path = Self::expand_home(target);

        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::Missing(path))
            }
            Err(err) => {
                return Err(ResolveError::Stale {
                    path,
                    reason: err.to_string(),
                })
            }
        };

        if !canonical.is_dir() {
            return Err(ResolveError::NotADirectory(canonical));
        }

        Ok(canonical)
    }
}
