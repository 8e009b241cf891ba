//! Per-run log files.
//!
//! Every backup or cleanup run writes `<op>_<timestamp>.log` into the log
//! directory and repoints `<op>_latest.log` at it. The file receives the
//! exact tool command lines and their combined output.

use crate::models::status::Operation;
use crate::tool::ToolOutput;
use crate::utils::errors::Result;
use chrono::{DateTime, Duration, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Create a fresh log file for `operation` and point the latest alias at it.
    pub fn create(dir: &Path, operation: Operation, run_id: Uuid, now: DateTime<Utc>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let stem = format!("{}_{}", operation.as_str(), now.format(FILE_TIMESTAMP_FORMAT));
        let mut path = dir.join(format!("{}.log", stem));
        // Two runs within the same second must not share a file.
        if path.exists() {
            path = dir.join(format!("{}_{}.log", stem, run_id.simple()));
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "=== {} run {} started {} ===",
            operation.as_str(),
            run_id,
            now.to_rfc3339()
        )?;

        let latest = latest_path(dir, operation);
        if let Err(e) = point_latest(&latest, &path) {
            warn!(path = %latest.display(), error = %e, "Failed to update latest log alias");
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a free-form line. Write failures are logged, never raised.
    pub fn line(&mut self, message: impl AsRef<str>) {
        if let Err(e) = writeln!(self.file, "{}", message.as_ref()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write run log");
        }
    }

    /// Append a tool invocation and everything it printed.
    pub fn tool(&mut self, output: &ToolOutput) {
        self.line(format!("$ {}", output.command));
        let body = output.output.trim_end();
        if !body.is_empty() {
            self.line(body);
        }
        self.line(format!("[exit status: {}]", output.describe_exit()));
    }
}

pub fn latest_path(dir: &Path, operation: Operation) -> PathBuf {
    dir.join(format!("{}_latest.log", operation.as_str()))
}

fn point_latest(latest: &Path, target: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(latest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    // Relative target keeps the alias valid if the state dir is moved.
    let target = target.file_name().map(PathBuf::from).unwrap_or_else(|| target.to_path_buf());
    std::os::unix::fs::symlink(target, latest)
}

/// Delete run logs older than `retention_days`. The latest aliases are left alone.
pub fn prune(dir: &Path, retention_days: u32, now: DateTime<Utc>) -> usize {
    let cutoff = now - Duration::days(i64::from(retention_days));
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "No run logs to prune");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".log") || name.ends_with("_latest.log") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if DateTime::<Utc>::from(modified) < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to prune run log"),
            }
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "Pruned old run logs");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_writes_header_and_latest_alias() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 3, 4).unwrap();
        let run_id = Uuid::new_v4();

        let mut log = RunLog::create(dir.path(), Operation::Backup, run_id, now).unwrap();
        assert_eq!(log.path(), dir.path().join("backup_20240301T020304Z.log"));
        log.tool(&ToolOutput {
            command: "wal-g backup-push /data".to_string(),
            success: true,
            exit_code: Some(0),
            output: "INFO: Doing full backup.\n".to_string(),
            stdout: String::new(),
        });

        let latest = latest_path(dir.path(), Operation::Backup);
        let content = std::fs::read_to_string(&latest).unwrap();
        assert!(content.contains(&run_id.to_string()));
        assert!(content.contains("$ wal-g backup-push /data"));
        assert!(content.contains("INFO: Doing full backup."));
        assert!(content.contains("[exit status: 0]"));
    }

    #[test]
    fn test_same_second_runs_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 3, 4).unwrap();

        let first = RunLog::create(dir.path(), Operation::Cleanup, Uuid::new_v4(), now).unwrap();
        let second = RunLog::create(dir.path(), Operation::Cleanup, Uuid::new_v4(), now).unwrap();
        assert_ne!(first.path(), second.path());

        let target = std::fs::read_link(latest_path(dir.path(), Operation::Cleanup)).unwrap();
        assert_eq!(Some(target.as_os_str()), second.path().file_name());
    }

    #[test]
    fn test_prune_keeps_recent_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let log = RunLog::create(dir.path(), Operation::Backup, Uuid::new_v4(), now).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(prune(dir.path(), 30, now), 0);
        // Everything written before "now + 1 day" is older than a zero-day window.
        assert_eq!(prune(dir.path(), 0, now + Duration::days(1)), 1);
        assert!(!log.path().exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
