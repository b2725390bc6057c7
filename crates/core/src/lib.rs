//! Settle Core - directory fingerprints and the watcher data model
//!
//! This crate provides the foundational pieces the engine builds on:
//! - Watcher configuration and runtime value types
//! - Directory fingerprint capture and diffing
//! - Ignore rules for platform and editor noise
//! - BLAKE3 content hashing for the content-hash signature mode

pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod ignore;
pub mod model;

// Re-export main types for convenience
pub use error::{CaptureError, ResolveError};
pub use fingerprint::{
    capture, CaptureOptions, DirectoryFingerprint, EntryKind, EntrySignature, FingerprintDiff,
    SignatureMode,
};
pub use hash::ContentHash;
pub use ignore::{IgnoreConfig, IgnoreRules};
pub use model::{
    DebounceWindows, Responsiveness, SessionId, WatchTarget, Watcher, WatcherId, WatcherPhase,
    WatcherRunInfo,
};
