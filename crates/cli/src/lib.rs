//! Settle CLI library
//!
//! Everything the `settle` binary needs that is worth testing on its own:
//! - Daemon lifecycle and the IPC protocol it speaks
//! - System configuration
//! - Watcher access that goes through the daemon when one is running

pub mod daemon;
pub mod data_access;
pub mod ipc;
pub mod locks;
pub mod system_config;
pub mod util;
