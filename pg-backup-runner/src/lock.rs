//! Advisory per-operation locks.
//!
//! Each operation class owns one lock file under the lock directory. The
//! lock is an exclusive `flock` held by an open file descriptor, so it is
//! released when the guard drops or the process dies, whichever comes first.
//! There is never a stale lock file to clean up.

use crate::utils::errors::{Result, RunnerError};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Operation classes that are serialized independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockName {
    BaseBackup,
    Cleanup,
}

impl LockName {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::BaseBackup => "basebackup",
            LockName::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Held lock. Dropping it closes the descriptor and releases the lock.
pub struct LockGuard {
    _file: Flock<File>,
    name: LockName,
    path: PathBuf,
}

impl LockGuard {
    pub fn name(&self) -> LockName {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.name, "Releasing lock");
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, name: LockName) -> PathBuf {
        self.dir.join(format!("{}.lock", name.as_str()))
    }

    /// Try to take the named lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(&self, name: LockName) -> Result<Option<LockGuard>> {
        let lock_err = |source: std::io::Error| RunnerError::Lock {
            name: name.as_str().to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(lock_err)?;
        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;

        let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                debug!(lock = %name, path = %path.display(), "Lock is held elsewhere");
                return Ok(None);
            }
            Err((_, errno)) => return Err(lock_err(std::io::Error::from(errno))),
        };

        // Holder PID is informational only; the descriptor is the lock.
        let mut file: &File = &locked;
        if let Err(e) = file.set_len(0).and_then(|_| writeln!(file, "{}", std::process::id())) {
            debug!(lock = %name, error = %e, "Could not record holder pid");
        }

        debug!(lock = %name, path = %path.display(), "Lock acquired");
        Ok(Some(LockGuard {
            _file: locked,
            name,
            path,
        }))
    }
}
