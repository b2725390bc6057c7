//! Directory fingerprints
//!
//! A fingerprint is a snapshot of a directory tree: relative path → entry
//! signature. Two fingerprints are equal when they hold the same set of
//! (path, signature) pairs, regardless of the order the walk visited them.
//! Convergence decisions rely only on that equality; [`FingerprintDiff`] is
//! for human-readable reporting.

use crate::error::CaptureError;
use crate::hash::{hash_file, ContentHash};
use crate::ignore::{IgnoreConfig, IgnoreRules};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// What goes into an entry signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureMode {
    /// Size + modification time
    #[default]
    Metadata,
    /// Size + modification time + BLAKE3 of the contents
    ContentHash,
}

/// Type of fingerprinted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// Per-entry signature
///
/// Directories record presence only. Their own mtime moves whenever a child
/// changes, which would attribute one change to every ancestor and, for
/// non-recursive watchers, leak changes from below the first level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntrySignature {
    pub kind: EntryKind,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub content: Option<ContentHash>,
}

impl EntrySignature {
    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            len: 0,
            modified: None,
            content: None,
        }
    }

    pub fn file(len: u64, modified: SystemTime) -> Self {
        Self {
            kind: EntryKind::File,
            len,
            modified: Some(modified),
            content: None,
        }
    }
}

/// Options for a single capture
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Walk the whole tree instead of only direct children
    pub recursive: bool,
    /// Absolute paths whose subtrees are left out entirely
    pub excluded: Vec<PathBuf>,
    pub signature: SignatureMode,
    pub ignore: IgnoreConfig,
}

impl CaptureOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_excluded(mut self, excluded: Vec<PathBuf>) -> Self {
        self.excluded = excluded;
        self
    }
}

/// Immutable snapshot of a directory tree at one instant
#[derive(Debug, Clone)]
pub struct DirectoryFingerprint {
    root: PathBuf,
    entries: AHashMap<PathBuf, EntrySignature>,
}

impl DirectoryFingerprint {
    /// Build a fingerprint from already-known entries
    pub fn from_entries(
        root: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (PathBuf, EntrySignature)>,
    ) -> Self {
        Self {
            root: root.into(),
            entries: entries.into_iter().collect(),
        }
    }

    /// Directory this fingerprint was captured from
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rel_path: &Path) -> Option<&EntrySignature> {
        self.entries.get(rel_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &EntrySignature)> {
        self.entries.iter()
    }

    /// True iff the (path, signature) sets differ
    pub fn changed_from(&self, previous: &DirectoryFingerprint) -> bool {
        self.entries != previous.entries
    }

    /// Count entries added, removed and modified since `previous`
    pub fn diff_from(&self, previous: &DirectoryFingerprint) -> FingerprintDiff {
        let mut diff = FingerprintDiff::default();

        for (path, signature) in &self.entries {
            match previous.entries.get(path) {
                None => diff.added += 1,
                Some(before) if before != signature => diff.modified += 1,
                Some(_) => {}
            }
        }

        diff.removed = previous
            .entries
            .keys()
            .filter(|path| !self.entries.contains_key(*path))
            .count();

        diff
    }
}

impl PartialEq for DirectoryFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for DirectoryFingerprint {}

/// Entry counts between two fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintDiff {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl FingerprintDiff {
    /// Diff against nothing: every entry is new
    pub fn baseline(current: &DirectoryFingerprint) -> Self {
        Self {
            added: current.len(),
            removed: 0,
            modified: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for FingerprintDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no changes");
        }
        write!(
            f,
            "{} added, {} removed, {} modified",
            self.added, self.removed, self.modified
        )
    }
}

/// Capture a fingerprint of `root`
///
/// Blocking: walks the directory. Entries that vanish between listing and
/// stat are skipped; the result is a best-effort snapshot.
pub fn capture(root: &Path, options: &CaptureOptions) -> Result<DirectoryFingerprint, CaptureError> {
    let metadata = std::fs::metadata(root).map_err(|source| CaptureError::Unreadable {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(CaptureError::NotADirectory(root.to_path_buf()));
    }
    // Surface permission problems on the root itself as unreadable
    std::fs::read_dir(root).map_err(|source| CaptureError::Unreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let rules = IgnoreRules::load(root, &options.ignore);
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_pruned(entry, root, &options.excluded, &rules));

    let mut entries = AHashMap::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if vanished(&err) => continue,
            Err(source) => {
                return Err(CaptureError::Walk {
                    root: root.to_path_buf(),
                    source,
                })
            }
        };

        let Ok(rel_path) = entry.path().strip_prefix(root) else {
            continue;
        };

        if let Some(signature) = signature_for(&entry, root, options.signature)? {
            entries.insert(rel_path.to_path_buf(), signature);
        }
    }

    Ok(DirectoryFingerprint {
        root: root.to_path_buf(),
        entries,
    })
}

/// Excluded subtrees and ignored entries are skipped along with descendants
fn is_pruned(entry: &DirEntry, root: &Path, excluded: &[PathBuf], rules: &IgnoreRules) -> bool {
    let path = entry.path();
    if excluded.iter().any(|x| x == path) {
        return true;
    }

    match path.strip_prefix(root) {
        Ok(rel_path) => rules.should_ignore(rel_path, entry.file_type().is_dir()),
        Err(_) => false,
    }
}

fn vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

fn signature_for(
    entry: &DirEntry,
    root: &Path,
    mode: SignatureMode,
) -> Result<Option<EntrySignature>, CaptureError> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return Ok(Some(EntrySignature::dir()));
    }

    let metadata = match entry.metadata() {
        Ok(metadata) => metadata,
        Err(err) if vanished(&err) => return Ok(None),
        Err(source) => {
            return Err(CaptureError::Walk {
                root: root.to_path_buf(),
                source,
            })
        }
    };

    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };

    let content = match (mode, kind) {
        (SignatureMode::ContentHash, EntryKind::File) => match hash_file(entry.path()) {
            Ok(hash) => Some(hash),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CaptureError::Hash {
                    path: entry.path().to_path_buf(),
                    source,
                })
            }
        },
        _ => None,
    };

    Ok(Some(EntrySignature {
        kind,
        len: metadata.len(),
        modified: metadata.modified().ok(),
        content,
    }))
}
