//! Last-run status facts.
//!
//! One JSON file per operation, overwritten on every run. Only external
//! monitoring reads these; no decision in the runner depends on them.

use crate::executor::BackupType;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Backup,
    Cleanup,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Cleanup => "cleanup",
        }
    }

    fn status_file(&self) -> &'static str {
        match self {
            Operation::Backup => "last_backup.json",
            Operation::Cleanup => "last_cleanup.json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub operation: Operation,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_type: Option<BackupType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub log_file: Option<PathBuf>,
    pub message: Option<String>,
}

impl RunStatus {
    pub fn new(run_id: Uuid, operation: Operation, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        Self {
            run_id,
            operation,
            outcome: Outcome::Success,
            backup_type: None,
            deleted_count: None,
            started_at,
            finished_at,
            duration_secs: (finished_at - started_at).num_seconds().max(0) as u64,
            log_file: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, operation: Operation) -> PathBuf {
        self.dir.join(operation.status_file())
    }

    /// Replace the status file for `status.operation` atomically.
    pub fn write(&self, status: &RunStatus) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(status.operation);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(status)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Like [`StatusStore::write`], but failures only produce a warning.
    pub fn record(&self, status: &RunStatus) {
        if let Err(e) = self.write(status) {
            tracing::warn!(operation = status.operation.as_str(), error = %e, "Failed to write status file");
        }
    }

    pub fn read(&self, operation: Operation) -> Result<Option<RunStatus>> {
        read_status(&self.path(operation))
    }
}

fn read_status(path: &Path) -> Result<Option<RunStatus>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
