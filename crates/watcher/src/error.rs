//! Error types for the watcher engine and facade

use settle_core::WatcherId;
use settle_store::StoreError;
use thiserror::Error;

/// Errors from the OS notification layer
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create notifier: {0}")]
    Notify(#[from] notify::Error),
}

/// Errors returned by [`crate::WatcherService`]
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("watcher {0} not found")]
    NotFound(WatcherId),

    #[error("invalid watcher: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
