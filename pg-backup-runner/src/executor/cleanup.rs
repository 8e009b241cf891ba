//! Retention cleanup.
//!
//! Two passes, each independent of the other's outcome:
//! 1. age pass (only with `max_age_days`): plan with [`RetentionPolicy`] and
//!    `delete before` the first survivor;
//! 2. count pass: `retain FULL <n>` as a safety net. With an age policy,
//!    `n` is raised to cover every full backup the age pass kept, so the
//!    pass is skipped when the backup list is unavailable.
//!
//! "Nothing to delete" is success for either pass.

use crate::config::Config;
use crate::models::backup::{parse_listing, BackupRecord};
use crate::models::status::{Operation, Outcome, RunStatus, StatusStore};
use crate::retention::{RetentionDecision, RetentionPolicy};
use crate::run_log::RunLog;
use crate::tool::classify::{classify_delete, DeleteOutcome};
use crate::tool::{BackupTool, ToolOutput};
use crate::utils::errors::{Result, RunnerError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CleanupResult {
    /// Backups that disappeared from the listing, or that would in a dry run.
    /// `None` when a failed listing left the count unknown.
    pub deleted_count: Option<usize>,
    pub dry_run: bool,
    pub duration_secs: u64,
    pub log_file: PathBuf,
}

pub struct CleanupExecutor<'a> {
    tool: &'a dyn BackupTool,
    config: &'a Config,
    status: StatusStore,
    run_id: Uuid,
}

impl<'a> CleanupExecutor<'a> {
    pub fn new(tool: &'a dyn BackupTool, config: &'a Config, run_id: Uuid) -> Self {
        Self {
            tool,
            config,
            status: StatusStore::new(config.status_dir()),
            run_id,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.config.retention.max_age_days, self.config.retention.retain_full)
    }

    pub async fn run(&self, dry_run: bool) -> Result<CleanupResult> {
        self.run_at(Utc::now(), dry_run).await
    }

    /// Run cleanup with `now` as the reference time for the age rule.
    pub async fn run_at(&self, now: DateTime<Utc>, dry_run: bool) -> Result<CleanupResult> {
        let started_at = Utc::now();
        let mut log = RunLog::create(&self.config.log_dir(), Operation::Cleanup, self.run_id, started_at)?;
        let policy = self.policy();

        info!(
            run_id = %self.run_id,
            max_age_days = ?policy.max_age_days,
            retain_full = policy.retain_full,
            dry_run,
            log = %log.path().display(),
            "Starting retention cleanup"
        );

        let mut failures = Vec::new();

        let before = match self.list(&mut log).await {
            Ok(records) => Some(records),
            Err(e) if policy.max_age_days.is_some() => {
                failures.push(format!("age pass skipped: {}", e));
                None
            }
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "Could not list backups before cleanup");
                None
            }
        };

        let mut planned = 0;
        let mut retain = policy.retain_full;
        if let Some(records) = &before {
            let decision = policy.plan(records, now);
            describe(&mut log, &policy, &decision);
            planned = decision.to_delete.len();
            retain = policy.retain_threshold(records, &decision);

            if !decision.deletion_safe {
                planned = 0;
                failures.push("age pass refused: plan would remove every backup".to_string());
            } else if let Some(target) = &decision.delete_before {
                if dry_run {
                    log.line(format!("dry run: would delete {} backup(s) before {}", planned, target));
                } else {
                    info!(run_id = %self.run_id, before = %target, count = planned, "Deleting backups past the age limit");
                    if let Err(e) = self.delete_step("delete before", self.tool.delete_before(&target.name).await, &mut log) {
                        failures.push(e);
                    }
                }
            } else if decision.is_noop() && policy.max_age_days.is_some() {
                info!(run_id = %self.run_id, "No backups past the age limit");
            }
        }

        let mut invoked = !dry_run && planned > 0;
        if dry_run {
            if let Some(records) = &before {
                let remaining = &records[planned..];
                let extra = RetentionPolicy::new(None, retain).plan_count_only(remaining);
                log.line(format!(
                    "dry run: retain FULL {} would delete {} more backup(s)",
                    retain,
                    extra.len()
                ));
                planned += extra.len();
            }
        } else if before.is_none() && policy.max_age_days.is_some() {
            // Without a listing the threshold cannot cover what the age rule keeps.
            warn!(run_id = %self.run_id, "Skipping full backup count pass, backup list unavailable");
            log.line("--- count pass skipped: backup list unavailable ---");
            failures.push("count pass skipped: backup list unavailable".to_string());
        } else {
            info!(run_id = %self.run_id, retain_full = retain, "Enforcing full backup count");
            invoked = true;
            if let Err(e) = self.delete_step("retain FULL", self.tool.retain_full(retain).await, &mut log) {
                failures.push(e);
            }
        }

        let deleted_count = if dry_run {
            before.as_ref().map(|_| planned)
        } else if !invoked {
            Some(0)
        } else {
            match (&before, self.list(&mut log).await) {
                (Some(before), Ok(after)) => Some(before.len().saturating_sub(after.len())),
                (_, Err(e)) => {
                    warn!(run_id = %self.run_id, error = %e, "Could not list backups after cleanup");
                    None
                }
                (None, Ok(_)) => None,
            }
        };
        let deleted = deleted_count.map_or_else(|| "unknown".to_string(), |n| n.to_string());

        let mut status = RunStatus::new(self.run_id, Operation::Cleanup, started_at);
        status.log_file = Some(log.path().to_path_buf());
        status.deleted_count = deleted_count;

        if failures.is_empty() {
            status.message = match deleted_count {
                Some(0) => Some("nothing to delete".to_string()),
                None => Some("deleted count unknown: backup list unavailable".to_string()),
                Some(_) if dry_run => Some("dry run".to_string()),
                Some(_) => None,
            };
            log.line(format!("=== cleanup finished: {} deleted ===", deleted));
            info!(run_id = %self.run_id, deleted = %deleted, dry_run, "Retention cleanup completed");
            self.status.record(&status);
            Ok(CleanupResult {
                deleted_count,
                dry_run,
                duration_secs: status.duration_secs,
                log_file: log.path().to_path_buf(),
            })
        } else {
            let message = failures.join("; ");
            status.outcome = Outcome::Failure;
            status.message = Some(message.clone());
            log.line(format!("=== cleanup failed: {} ===", message));
            error!(run_id = %self.run_id, error = %message, "Retention cleanup failed");
            self.status.record(&status);
            Err(RunnerError::Cleanup(message))
        }
    }

    async fn list(&self, log: &mut RunLog) -> Result<Vec<BackupRecord>> {
        let output = self.tool.list().await?;
        log.tool(&output);
        if !output.success {
            return match classify_delete(&output.output) {
                DeleteOutcome::BenignEmpty => Ok(Vec::new()),
                DeleteOutcome::RealFailure => Err(RunnerError::Tool(format!(
                    "backup-list exited with {}: {}",
                    output.describe_exit(),
                    output.last_line()
                ))),
            };
        }
        Ok(parse_listing(&output.stdout))
    }

    /// Interpret one delete invocation; `Err` carries a failure description.
    fn delete_step(
        &self,
        step: &str,
        output: Result<ToolOutput>,
        log: &mut RunLog,
    ) -> std::result::Result<(), String> {
        let output = output.map_err(|e| format!("{}: {}", step, e))?;
        log.tool(&output);
        if output.success {
            return Ok(());
        }
        match classify_delete(&output.output) {
            DeleteOutcome::BenignEmpty => {
                info!(run_id = %self.run_id, step, "Nothing to delete");
                Ok(())
            }
            DeleteOutcome::RealFailure => {
                error!(run_id = %self.run_id, step, exit = %output.describe_exit(), "Delete step failed");
                Err(format!(
                    "{} exited with {}: {}",
                    step,
                    output.describe_exit(),
                    output.last_line()
                ))
            }
        }
    }
}

fn describe(log: &mut RunLog, policy: &RetentionPolicy, decision: &RetentionDecision) {
    for name in &decision.unparseable {
        log.line(format!("warning: no timestamp in '{}', kept", name));
    }
    if let Some(boundary) = &decision.boundary {
        log.line(format!(
            "age limit {} day(s): oldest kept by age is {}",
            policy.max_age_days.unwrap_or_default(),
            boundary
        ));
    }
    log.line(format!(
        "count rule protects the newest {} full backup(s)",
        decision.keep_count
    ));
    for record in &decision.to_delete {
        log.line(format!("delete candidate: {}", record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::{failed, ok, Call, ScriptedTool};
    use chrono::TimeZone;

    fn config(dir: &std::path::Path, max_age_days: Option<u32>, retain_full: usize) -> Config {
        let mut config = Config::default();
        config.walg.destination = Some("file:///backups".to_string());
        config.paths.state_dir = dir.to_path_buf();
        config.retention.max_age_days = max_age_days;
        config.retention.retain_full = retain_full;
        config
    }

    fn listing(days: std::ops::RangeInclusive<u32>) -> String {
        let mut out = String::from("name modified wal_segment_backup_start\n");
        for d in days {
            out.push_str(&format!("base_202401{:02}T000000Z 2024-01-{:02}T00:00:00Z 0000\n", d, d));
        }
        out
    }

    fn jan(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_age_and_count_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(1..=10)))
            .on_list(ok(&listing(6..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();

        assert_eq!(result.deleted_count, Some(5));
        assert_eq!(
            tool.calls(),
            vec![
                Call::List,
                Call::DeleteBefore("base_20240106T000000Z".to_string()),
                Call::RetainFull(5),
                Call::List,
            ]
        );
    }

    #[tokio::test]
    async fn test_count_pass_runs_without_age_policy() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), None, 7);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(1..=10)))
            .on_list(ok(&listing(4..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();

        assert_eq!(result.deleted_count, Some(3));
        assert_eq!(tool.count(|c| matches!(c, Call::DeleteBefore(_))), 0);
        assert_eq!(tool.count(|c| *c == Call::RetainFull(7)), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_delete_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(30), 3);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(1..=10)))
            .on_retain_full(failed("ERROR: No backups found to delete"))
            .on_list(ok(&listing(1..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();
        assert_eq!(result.deleted_count, Some(0));

        let status = StatusStore::new(config.status_dir()).read(Operation::Cleanup).unwrap().unwrap();
        assert_eq!(status.outcome, Outcome::Success);
        assert_eq!(status.message.as_deref(), Some("nothing to delete"));
    }

    #[tokio::test]
    async fn test_failed_age_pass_still_runs_count_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(1..=10)))
            .on_delete_before(failed("ERROR: permission denied"))
            .on_list(ok(&listing(1..=10)));

        let err = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Cleanup(ref m) if m.contains("permission denied")));
        assert_eq!(tool.count(|c| *c == Call::RetainFull(5)), 1);

        let status = StatusStore::new(config.status_dir()).read(Operation::Cleanup).unwrap().unwrap();
        assert_eq!(status.outcome, Outcome::Failure);
    }

    #[tokio::test]
    async fn test_list_failure_with_age_policy_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new().on_list(failed("ERROR: ssh: connect to host storage: timeout"));

        let err = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cleanup(ref m) if m.contains("count pass skipped")));
        assert_eq!(tool.calls(), vec![Call::List]);

        let status = StatusStore::new(config.status_dir()).read(Operation::Cleanup).unwrap().unwrap();
        assert_eq!(status.outcome, Outcome::Failure);
        assert_eq!(status.deleted_count, Some(0));
    }

    #[tokio::test]
    async fn test_list_failure_without_age_policy_still_enforces_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), None, 3);
        let tool = ScriptedTool::new()
            .on_list(failed("ERROR: ssh: connect to host storage: timeout"))
            .on_list(ok(&listing(8..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();
        assert_eq!(tool.calls(), vec![Call::List, Call::RetainFull(3), Call::List]);
        assert_eq!(result.deleted_count, None);
    }

    #[tokio::test]
    async fn test_failed_relist_leaves_count_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(1..=10)))
            .on_list(failed("ERROR: ssh: connect to host storage: timeout"));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();
        assert_eq!(result.deleted_count, None);

        let status = StatusStore::new(config.status_dir()).read(Operation::Cleanup).unwrap().unwrap();
        assert_eq!(status.outcome, Outcome::Success);
        assert_eq!(status.deleted_count, None);
        assert!(status.message.unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn test_log_lines_on_stderr_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 1);
        let mut reply = ok(&listing(1..=3));
        reply.output.push_str("WARNING: 2024/03/01 00:00:00.000000 storage is slow\n");
        let tool = ScriptedTool::new().on_list(reply);

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), true)
            .await
            .unwrap();
        // All three are old; only the newest survives.
        assert_eq!(result.deleted_count, Some(2));
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("would delete 2 backup(s) before base_20240103T000000Z"));
    }

    #[tokio::test]
    async fn test_dry_run_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new().on_list(ok(&listing(1..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), true)
            .await
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.deleted_count, Some(5));
        assert_eq!(tool.calls(), vec![Call::List]);
        let log = std::fs::read_to_string(&result.log_file).unwrap();
        assert!(log.contains("would delete 5 backup(s) before base_20240106T000000Z"));
    }

    #[tokio::test]
    async fn test_second_run_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Some(5), 3);
        let tool = ScriptedTool::new()
            .on_list(ok(&listing(6..=10)))
            .on_list(ok(&listing(6..=10)));

        let result = CleanupExecutor::new(&tool, &config, Uuid::new_v4())
            .run_at(jan(11), false)
            .await
            .unwrap();
        assert_eq!(result.deleted_count, Some(0));
        assert_eq!(tool.count(|c| matches!(c, Call::DeleteBefore(_))), 0);
    }
}
