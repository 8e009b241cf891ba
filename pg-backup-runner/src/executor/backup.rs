//! Base backup execution with a single full-backup fallback.

use super::BackupType;
use crate::config::Config;
use crate::models::status::{Operation, Outcome, RunStatus, StatusStore};
use crate::run_log::RunLog;
use crate::tool::classify::{classify_push, is_identity_mismatch, PushKind};
use crate::tool::{BackupTool, ToolOutput};
use crate::utils::errors::{Result, RunnerError};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub backup_type: BackupType,
    pub duration_secs: u64,
    pub log_file: PathBuf,
}

pub struct BackupExecutor<'a> {
    tool: &'a dyn BackupTool,
    config: &'a Config,
    status: StatusStore,
    run_id: Uuid,
}

impl<'a> BackupExecutor<'a> {
    pub fn new(tool: &'a dyn BackupTool, config: &'a Config, run_id: Uuid) -> Self {
        Self {
            tool,
            config,
            status: StatusStore::new(config.status_dir()),
            run_id,
        }
    }

    /// Push one base backup. `force_full` skips delta chaining entirely.
    pub async fn run(&self, force_full: bool) -> Result<BackupResult> {
        let started_at = Utc::now();
        let mut log = RunLog::create(&self.config.log_dir(), Operation::Backup, self.run_id, started_at)?;

        info!(
            run_id = %self.run_id,
            data_dir = %self.config.walg.data_dir.display(),
            force_full,
            log = %log.path().display(),
            "Starting base backup"
        );

        let result = self.push(&mut log, force_full).await;

        let mut status = RunStatus::new(self.run_id, Operation::Backup, started_at);
        status.log_file = Some(log.path().to_path_buf());
        match &result {
            Ok(backup_type) => {
                status.backup_type = Some(*backup_type);
                if *backup_type == BackupType::Unknown {
                    status.message = Some("backup type could not be determined from tool output".to_string());
                }
                log.line(format!("=== backup finished: {} ({}s) ===", backup_type, status.duration_secs));
                info!(run_id = %self.run_id, backup_type = %backup_type, duration_secs = status.duration_secs, "Base backup completed");
            }
            Err(e) => {
                status.outcome = Outcome::Failure;
                status.message = Some(e.to_string());
                log.line(format!("=== backup failed: {} ===", e));
                error!(run_id = %self.run_id, error = %e, "Base backup failed");
            }
        }
        self.status.record(&status);

        result.map(|backup_type| BackupResult {
            backup_type,
            duration_secs: status.duration_secs,
            log_file: log.path().to_path_buf(),
        })
    }

    async fn push(&self, log: &mut RunLog, force_full: bool) -> Result<BackupType> {
        let data_dir = &self.config.walg.data_dir;

        let first = self.tool.push(data_dir, force_full).await?;
        log.tool(&first);
        if first.success {
            return Ok(backup_type(&first, force_full));
        }

        if force_full || !is_identity_mismatch(&first.output) {
            return Err(push_failure(&first));
        }

        warn!(
            run_id = %self.run_id,
            "Delta backup refused: database no longer matches its parent backup, retrying as full"
        );
        log.line("--- identity mismatch with parent backup, retrying as full backup ---");

        let retry = self.tool.push(data_dir, true).await?;
        log.tool(&retry);
        if retry.success {
            Ok(BackupType::FullRetry)
        } else {
            Err(push_failure(&retry))
        }
    }
}

fn backup_type(output: &ToolOutput, full_requested: bool) -> BackupType {
    match classify_push(&output.output) {
        PushKind::Full => BackupType::Full,
        PushKind::Delta => BackupType::Delta,
        PushKind::Unknown if full_requested => BackupType::Full,
        PushKind::Unknown => {
            warn!("Backup succeeded but its type could not be determined");
            BackupType::Unknown
        }
    }
}

fn push_failure(output: &ToolOutput) -> RunnerError {
    RunnerError::Backup(format!(
        "backup-push exited with {}: {}",
        output.describe_exit(),
        output.last_line()
    ))
}
