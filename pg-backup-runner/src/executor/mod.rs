//! Backup and cleanup executors.
//!
//! Each executor owns one operation end to end: it opens the run log, drives
//! the backup tool, interprets the result and records the status fact. Lock
//! handling and notification belong to the runner.

pub mod backup;
pub mod cleanup;

pub use backup::{BackupExecutor, BackupResult};
pub use cleanup::{CleanupExecutor, CleanupResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a completed base backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    Delta,
    /// Full backup taken after a delta push was refused for identity mismatch
    FullRetry,
    /// Succeeded, but the output carried no recognizable type marker
    Unknown,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupType::Full => "full",
            BackupType::Delta => "delta",
            BackupType::FullRetry => "full_retry",
            BackupType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
