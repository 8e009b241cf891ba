//! External backup tool seam.
//!
//! The runner never talks to storage itself. It shells out to the backup
//! tool through [`BackupTool`] and only looks at exit codes and text output.

pub mod classify;
pub mod walg;

use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::Path;

pub use walg::WalG;

/// What a tool invocation printed and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Command line as it was run, for the run log
    pub command: String,
    pub success: bool,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, for the run log and marker matching
    pub output: String,
    /// Standard output alone. WAL-G logs to stderr, so only this is data.
    pub stdout: String,
}

impl ToolOutput {
    pub fn describe_exit(&self) -> String {
        match self.exit_code {
            Some(code) => code.to_string(),
            None => "terminated by signal".to_string(),
        }
    }

    /// Last non-empty output line, used as a short error summary.
    pub fn last_line(&self) -> &str {
        self.output
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Primitives the runner needs from the backup tool.
///
/// `Err` means the tool could not be run at all. A tool that ran and failed
/// returns `Ok` with `success == false`.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Cheap invocation used to check the tool is installed.
    async fn version(&self) -> Result<ToolOutput>;

    /// List base backups, oldest first, one per line.
    async fn list(&self) -> Result<ToolOutput>;

    /// Push a new base backup of `data_dir`. `full` disables delta chaining.
    async fn push(&self, data_dir: &Path, full: bool) -> Result<ToolOutput>;

    /// Delete every backup strictly older than `backup`, plus WAL only they need.
    async fn delete_before(&self, backup: &str) -> Result<ToolOutput>;

    /// Delete everything except the `count` most recent full backups and their deltas.
    async fn retain_full(&self, count: usize) -> Result<ToolOutput>;
}
