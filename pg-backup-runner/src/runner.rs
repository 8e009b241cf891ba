//! Mode orchestration and exit-code contract.
//!
//! A run validates the environment, takes the lock for each operation it
//! performs, drives the matching executor and maps the result onto
//! [`RunOutcome`]. Only configuration and operational failures notify.

use crate::config::Config;
use crate::executor::{BackupExecutor, CleanupExecutor};
use crate::lock::{LockGuard, LockManager, LockName};
use crate::models::status::Operation;
use crate::notify::Notifier;
use crate::run_log;
use crate::tool::BackupTool;
use crate::utils::errors::{Result, RunnerError};
use chrono::Utc;
use clap::ValueEnum;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Push one base backup
    Backup,
    /// Apply the retention policy
    Clean,
    /// Backup, then clean if the backup succeeded
    Combo,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Backup => "backup",
            Mode::Clean => "clean",
            Mode::Combo => "combo",
        }
    }

    fn pushes(&self) -> bool {
        matches!(self, Mode::Backup | Mode::Combo)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    EnvInvalid,
    /// Another run holds the lock. Not an error.
    Busy,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure => 1,
            RunOutcome::EnvInvalid => 2,
            RunOutcome::Busy => 3,
        }
    }
}

pub struct Runner<'a> {
    config: &'a Config,
    tool: &'a dyn BackupTool,
    locks: LockManager,
    notifier: Notifier,
    run_id: Uuid,
    dry_run: bool,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config, tool: &'a dyn BackupTool, notifier: Notifier) -> Self {
        Self {
            config,
            tool,
            locks: LockManager::new(config.lock_dir()),
            notifier,
            run_id: Uuid::new_v4(),
            dry_run: false,
        }
    }

    /// Never push or delete; cleanup only lists and logs its decision.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self, mode: Mode) -> RunOutcome {
        info!(
            run_id = %self.run_id,
            mode = %mode,
            dry_run = self.dry_run,
            notify = self.notifier.is_enabled(),
            "Run started"
        );

        if let Err(e) = self.validate(mode).await {
            error!(run_id = %self.run_id, mode = %mode, error = %e, "Environment invalid");
            self.notifier
                .notify("configuration invalid", &self.detail(mode.as_str(), &e, None))
                .await;
            return RunOutcome::EnvInvalid;
        }

        run_log::prune(&self.config.log_dir(), self.config.paths.log_retention_days, Utc::now());

        let outcome = match mode {
            Mode::Backup => self.backup().await,
            Mode::Clean => self.clean().await,
            Mode::Combo => match self.backup().await {
                RunOutcome::Success => self.clean().await,
                RunOutcome::Busy => {
                    info!(run_id = %self.run_id, "Backup skipped, cleanup skipped as well");
                    RunOutcome::Busy
                }
                other => {
                    warn!(run_id = %self.run_id, "Backup did not succeed, skipping cleanup");
                    other
                }
            },
        };

        info!(
            run_id = %self.run_id,
            mode = %mode,
            exit_code = outcome.exit_code(),
            "Run finished"
        );
        outcome
    }

    async fn validate(&self, mode: Mode) -> Result<()> {
        self.config.validate()?;

        if mode.pushes() && !self.config.walg.data_dir.is_dir() {
            return Err(RunnerError::Config(format!(
                "data directory {} does not exist",
                self.config.walg.data_dir.display()
            )));
        }

        let version = self.tool.version().await?;
        if !version.success {
            return Err(RunnerError::Tool(format!(
                "`{}` exited with {}: {}",
                version.command,
                version.describe_exit(),
                version.last_line()
            )));
        }
        debug!(version = version.last_line(), "Backup tool reachable");
        Ok(())
    }

    async fn backup(&self) -> RunOutcome {
        if self.dry_run {
            info!(run_id = %self.run_id, "Dry run, skipping backup push");
            return RunOutcome::Success;
        }

        let _guard = match self.acquire(LockName::BaseBackup).await {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };

        let executor = BackupExecutor::new(self.tool, self.config, self.run_id);
        match executor.run(self.config.backup.force_full).await {
            Ok(_) => RunOutcome::Success,
            Err(e) => {
                self.notify_failure(Operation::Backup, &e).await;
                RunOutcome::Failure
            }
        }
    }

    async fn clean(&self) -> RunOutcome {
        let _guard = match self.acquire(LockName::Cleanup).await {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };

        let executor = CleanupExecutor::new(self.tool, self.config, self.run_id);
        match executor.run(self.dry_run).await {
            Ok(_) => RunOutcome::Success,
            Err(e) => {
                self.notify_failure(Operation::Cleanup, &e).await;
                RunOutcome::Failure
            }
        }
    }

    async fn acquire(&self, name: LockName) -> std::result::Result<LockGuard, RunOutcome> {
        match self.locks.try_acquire(name) {
            Ok(Some(guard)) => {
                info!(
                    run_id = %self.run_id,
                    lock = %guard.name(),
                    path = %guard.path().display(),
                    "Lock acquired"
                );
                Ok(guard)
            }
            Ok(None) => {
                info!(run_id = %self.run_id, lock = %name, "Lock busy, another run is in progress");
                Err(RunOutcome::Busy)
            }
            Err(e) => {
                error!(run_id = %self.run_id, lock = %name, error = %e, "Cannot take lock");
                self.notifier
                    .notify("configuration invalid", &self.detail(name.as_str(), &e, None))
                    .await;
                Err(RunOutcome::EnvInvalid)
            }
        }
    }

    async fn notify_failure(&self, operation: Operation, err: &RunnerError) {
        let log = run_log::latest_path(&self.config.log_dir(), operation);
        let subject = format!("{} failed", operation.as_str());
        self.notifier
            .notify(&subject, &self.detail(operation.as_str(), err, Some(&log)))
            .await;
    }

    fn detail(&self, what: &str, err: &RunnerError, log: Option<&Path>) -> String {
        let mut detail = format!("operation: {}\nrun_id: {}\nerror: {}", what, self.run_id, err);
        if let Some(log) = log {
            detail.push_str(&format!("\nlog: {}", log.display()));
        }
        detail
    }
}
