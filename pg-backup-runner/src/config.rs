//! Configuration management for the backup runner.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides. The resulting [`Config`] is built once in `main` and handed to
//! every component by reference; nothing below this module reads the process
//! environment.

use crate::utils::errors::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub walg: WalgConfig,
    pub backup: BackupConfig,
    pub retention: RetentionConfig,
    pub paths: PathsConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalgConfig {
    /// Remote destination URI (`ssh://`, `s3://`, `gs://`, `azure://`, `file://` or an absolute path)
    pub destination: Option<String>,

    /// PostgreSQL data directory pushed by `backup-push`
    pub data_dir: PathBuf,

    /// WAL-G binary name or path
    pub binary: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Always take a full backup instead of a delta
    pub force_full: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Number of most recent full backups that always survive cleanup
    pub retain_full: usize,

    /// Backups older than this many days are deleted (disabled when unset)
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for lock files, run logs and status facts
    pub state_dir: PathBuf,

    /// Run logs older than this are pruned at the start of each run
    pub log_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Base URL of the messaging API
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

// Default values
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/postgresql/data")
}

fn default_binary() -> PathBuf {
    PathBuf::from("wal-g")
}

fn default_retain_full() -> usize {
    7
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/pg-backup-runner")
}

fn default_log_retention_days() -> u32 {
    30
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WalgConfig {
    fn default() -> Self {
        Self {
            destination: None,
            data_dir: default_data_dir(),
            binary: default_binary(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retain_full: default_retain_full(),
            max_age_days: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            api_url: default_api_url(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Destination variables WAL-G understands, in lookup order.
const DESTINATION_VARS: &[&str] = &[
    "BACKUP_DESTINATION",
    "WALG_SSH_PREFIX",
    "WALG_S3_PREFIX",
    "WALG_GS_PREFIX",
    "WALG_AZ_PREFIX",
    "WALG_FILE_PREFIX",
];

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then the
    /// process environment (including a `.env` file if present).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| RunnerError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Apply environment overrides through `lookup`. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dest) = DESTINATION_VARS.iter().find_map(|key| get(*key)) {
            self.walg.destination = Some(dest);
        }
        if let Some(v) = get("PGDATA") {
            self.walg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WALG_BIN") {
            self.walg.binary = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_FORCE_FULL") {
            self.backup.force_full = parse_bool("BACKUP_FORCE_FULL", &v)?;
        }
        if let Some(v) = get("BACKUP_RETAIN_FULL") {
            self.retention.retain_full = parse_number("BACKUP_RETAIN_FULL", &v)?;
        }
        if let Some(v) = get("BACKUP_MAX_AGE_DAYS") {
            self.retention.max_age_days = Some(parse_number("BACKUP_MAX_AGE_DAYS", &v)?);
        }
        if let Some(v) = get("BACKUP_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_LOG_RETENTION_DAYS") {
            self.paths.log_retention_days = parse_number("BACKUP_LOG_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.notify.telegram_bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.notify.telegram_chat_id = Some(v);
        }
        if let Some(v) = get("NOTIFY_API_URL") {
            self.notify.api_url = v;
        }
        if let Some(v) = get("RUNNER_LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    /// Check required settings. Every problem is reported, not only the first.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        match &self.walg.destination {
            None => problems.push("backup destination is not set (BACKUP_DESTINATION)".to_string()),
            Some(dest) => {
                if let Err(e) = storage_prefix(dest) {
                    problems.push(e);
                }
            }
        }
        if self.retention.retain_full == 0 {
            problems.push("BACKUP_RETAIN_FULL must be at least 1".to_string());
        }
        if self.retention.max_age_days == Some(0) {
            problems.push("BACKUP_MAX_AGE_DAYS must be at least 1 when set".to_string());
        }
        if self.walg.binary.as_os_str().is_empty() {
            problems.push("WAL-G binary path is empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::Config(problems.join("; ")))
        }
    }

    /// The environment variable and value that tell WAL-G where to store backups.
    pub fn storage_env(&self) -> Result<(&'static str, String)> {
        let dest = self
            .walg
            .destination
            .as_deref()
            .ok_or_else(|| RunnerError::Config("backup destination is not set".to_string()))?;
        storage_prefix(dest).map_err(RunnerError::Config)
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.paths.state_dir.join("locks")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.paths.state_dir.join("logs")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.paths.state_dir.join("status")
    }
}

/// Map a destination URI to the WAL-G prefix variable that carries it.
fn storage_prefix(dest: &str) -> std::result::Result<(&'static str, String), String> {
    if let Some(path) = dest.strip_prefix("file://") {
        return Ok(("WALG_FILE_PREFIX", path.to_string()));
    }
    if dest.starts_with('/') {
        return Ok(("WALG_FILE_PREFIX", dest.to_string()));
    }

    let var = match dest.split_once("://").map(|(scheme, _)| scheme) {
        Some("ssh") => "WALG_SSH_PREFIX",
        Some("s3") => "WALG_S3_PREFIX",
        Some("gs") => "WALG_GS_PREFIX",
        Some("azure") => "WALG_AZ_PREFIX",
        Some(other) => return Err(format!("unsupported destination scheme '{}'", other)),
        None => return Err(format!("destination '{}' is not a URI or absolute path", dest)),
    };
    Ok((var, dest.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RunnerError::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RunnerError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
