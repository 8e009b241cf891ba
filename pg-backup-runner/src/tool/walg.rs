//! WAL-G driven through `tokio::process`.

use super::{BackupTool, ToolOutput};
use crate::config::Config;
use crate::utils::errors::{Result, RunnerError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

pub struct WalG {
    binary: PathBuf,
    /// Prefix variable and value that select the storage backend
    storage: Option<(&'static str, String)>,
}

impl WalG {
    pub fn new(binary: impl Into<PathBuf>, storage: (&'static str, String)) -> Self {
        Self {
            binary: binary.into(),
            storage: Some(storage),
        }
    }

    /// Build from configuration. A missing destination is reported when the
    /// tool is first run, so the runner can validate and notify first.
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.walg.binary.clone(),
            storage: config.storage_env().ok(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.binary.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run WAL-G to completion, collecting stdout and stderr in arrival order.
    async fn run(&self, args: Vec<String>, extra_env: &[(&str, &str)]) -> Result<ToolOutput> {
        let (prefix_var, prefix) = self
            .storage
            .as_ref()
            .ok_or_else(|| RunnerError::Config("backup destination is not set".to_string()))?;
        let command = self.command_line(&args);
        info!(command = %command, "Running backup tool");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .env(*prefix_var, prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::Tool(format!("cannot start {}: {}", self.binary.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Tool("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::Tool("stderr not captured".to_string()))?;
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);

        // Partial lines stay in these buffers across select! rounds.
        let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
        let mut output = String::new();
        let mut stdout_text = String::new();
        let (mut stdout_open, mut stderr_open) = (true, true);
        while stdout_open || stderr_open {
            let (line, from_stdout) = tokio::select! {
                n = stdout.read_until(b'\n', &mut out_buf), if stdout_open => {
                    stdout_open = n? > 0;
                    (take_line(&mut out_buf), true)
                }
                n = stderr.read_until(b'\n', &mut err_buf), if stderr_open => {
                    stderr_open = n? > 0;
                    (take_line(&mut err_buf), false)
                }
            };
            if let Some(line) = line {
                debug!(target: "walg", "{}", line);
                output.push_str(&line);
                output.push('\n');
                if from_stdout {
                    stdout_text.push_str(&line);
                    stdout_text.push('\n');
                }
            }
        }

        let status = child.wait().await?;
        debug!(command = %command, status = %status, "Backup tool finished");

        Ok(ToolOutput {
            command,
            success: status.success(),
            exit_code: status.code(),
            output,
            stdout: stdout_text,
        })
    }
}

/// Drain one line from `buf`. Bytes that are not UTF-8 are replaced rather
/// than failing the read, which would kill a running child.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    Some(line)
}

#[async_trait]
impl BackupTool for WalG {
    async fn version(&self) -> Result<ToolOutput> {
        self.run(vec!["--version".to_string()], &[]).await
    }

    async fn list(&self) -> Result<ToolOutput> {
        self.run(vec!["backup-list".to_string()], &[]).await
    }

    async fn push(&self, data_dir: &Path, full: bool) -> Result<ToolOutput> {
        let mut args = vec!["backup-push".to_string(), data_dir.display().to_string()];
        if full {
            args.push("--full".to_string());
            self.run(args, &[("WALG_DELTA_MAX_STEPS", "0")]).await
        } else {
            self.run(args, &[]).await
        }
    }

    async fn delete_before(&self, backup: &str) -> Result<ToolOutput> {
        let args = ["delete", "before", backup, "--confirm"];
        self.run(args.iter().map(|a| a.to_string()).collect(), &[]).await
    }

    async fn retain_full(&self, count: usize) -> Result<ToolOutput> {
        let count = count.to_string();
        let args = ["delete", "retain", "FULL", count.as_str(), "--confirm"];
        self.run(args.iter().map(|a| a.to_string()).collect(), &[]).await
    }
}
