//! Ignore rules for fingerprint capture
//!
//! Entries matched here never enter a fingerprint, so they can neither
//! trigger a dispatch nor keep a convergence loop from settling.
//! Sources, checked in order:
//! 1. Built-in platform and editor noise (always active)
//! 2. `.settleignore` at the watch root (gitignore syntax, optional)
//! 3. Additional patterns from configuration (gitignore syntax)

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Name of the per-directory ignore file
pub const IGNORE_FILE: &str = ".settleignore";

/// Ignore configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Read `.settleignore` from the watch root (default: true)
    #[serde(default = "default_true")]
    pub use_ignore_file: bool,

    /// Additional gitignore-style patterns
    #[serde(default)]
    pub additional_patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_ignore_file: true,
            additional_patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}

/// Compiled ignore rules for one watch root
pub struct IgnoreRules {
    ignore_file: Option<Gitignore>,
    additional: Option<Gitignore>,
}

impl IgnoreRules {
    /// Load rules for a watch root
    ///
    /// A malformed ignore file or pattern is logged and skipped rather than
    /// failing the capture.
    pub fn load(root: &Path, config: &IgnoreConfig) -> Self {
        let ignore_file = if config.use_ignore_file {
            let path = root.join(IGNORE_FILE);
            if path.is_file() {
                let mut builder = GitignoreBuilder::new(root);
                if let Some(err) = builder.add(&path) {
                    warn!("Ignoring unreadable {}: {}", path.display(), err);
                }
                build(builder, root)
            } else {
                None
            }
        } else {
            None
        };

        let additional = if config.additional_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.additional_patterns {
                if let Err(err) = builder.add_line(None, pattern) {
                    warn!("Skipping invalid ignore pattern '{}': {}", pattern, err);
                }
            }
            build(builder, root)
        };

        Self {
            ignore_file,
            additional,
        }
    }

    /// Check whether a root-relative path should be left out of fingerprints
    pub fn should_ignore(&self, rel_path: &Path, is_dir: bool) -> bool {
        if is_builtin_ignored(rel_path) {
            return true;
        }

        if let Some(ref rules) = self.ignore_file {
            if rules.matched_path_or_any_parents(rel_path, is_dir).is_ignore() {
                return true;
            }
        }

        if let Some(ref rules) = self.additional {
            if rules.matched_path_or_any_parents(rel_path, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }
}

fn build(builder: GitignoreBuilder, root: &Path) -> Option<Gitignore> {
    match builder.build() {
        Ok(rules) => Some(rules),
        Err(err) => {
            warn!("Failed to compile ignore rules for {}: {}", root.display(), err);
            None
        }
    }
}

/// Platform metadata and editor scratch files
///
/// These appear and vanish as a side effect of someone looking at a folder,
/// which would otherwise look like real changes.
fn is_builtin_ignored(rel_path: &Path) -> bool {
    let filename = rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    // Our own ignore file is configuration, not content
    if filename == IGNORE_FILE {
        return true;
    }

    // macOS metadata
    if filename == ".DS_Store" || filename.starts_with("._") {
        return true;
    }

    // Windows metadata
    if filename == "Thumbs.db" || filename == "desktop.ini" {
        return true;
    }

    // Vim swap files
    if filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.ends_with(".swn")
        || filename.ends_with(".swx")
    {
        return true;
    }

    // Vim/Emacs backups and Emacs lock/auto-save files
    if filename.ends_with('~')
        || filename.starts_with(".#")
        || (filename.len() > 1 && filename.starts_with('#') && filename.ends_with('#'))
    {
        return true;
    }

    false
}
