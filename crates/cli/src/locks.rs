//! Lock file management for daemon exclusivity

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "locks/daemon.lock";

/// Exclusive hold on a state directory; released on drop
pub struct DaemonLock {
    path: PathBuf,
    _file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
pub struct LockContent {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl DaemonLock {
    /// Acquire the daemon lock for `state_dir`
    ///
    /// Fails while another live process holds it. A lock left behind by a
    /// dead process is removed and acquisition retried once.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        Self::acquire_inner(state_dir, true)
    }

    fn acquire_inner(state_dir: &Path, retry_stale: bool) -> Result<Self> {
        let lock_path = state_dir.join(LOCK_FILE);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        if !try_flock_exclusive(&file)? {
            if retry_stale && Self::is_stale_lock(&mut file) {
                tracing::warn!(path = %lock_path.display(), "Removing stale daemon lock");
                drop(file);
                std::fs::remove_file(&lock_path)?;
                return Self::acquire_inner(state_dir, false);
            }
            anyhow::bail!("Daemon already running (lock file held by active process)");
        }

        Self::write_lock_content(&mut file)?;

        Ok(Self {
            path: lock_path,
            _file: file,
        })
    }

    /// Release the lock and remove the lock file
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).context("Failed to remove lock file")?;
        Ok(())
    }

    /// Owner of the lock for `state_dir`, if that process is alive
    pub fn holder(state_dir: &Path) -> Option<LockContent> {
        let mut file = File::open(state_dir.join(LOCK_FILE)).ok()?;
        let content = Self::read_lock_content(&mut file).ok()?;
        is_process_alive(content.pid).then_some(content)
    }

    fn is_stale_lock(file: &mut File) -> bool {
        match Self::read_lock_content(file) {
            Ok(content) => !is_process_alive(content.pid),
            // Unreadable content: the holder never finished writing it
            Err(_) => true,
        }
    }

    fn write_lock_content(file: &mut File) -> Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let serialized =
            serde_json::to_string(&content).context("Failed to serialize lock content")?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_lock_content(file: &mut File) -> Result<LockContent> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).context("Failed to deserialize lock content")
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Try to acquire exclusive file lock (non-blocking)
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Null signal: checks existence without delivering anything
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}
