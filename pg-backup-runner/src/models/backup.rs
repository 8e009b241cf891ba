use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp format embedded in backup names, e.g. `base_20240101T000000Z`.
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Level prefixes of WAL-G log lines, which never name a backup.
const LOG_LEVEL_PREFIXES: &[&str] = &["INFO:", "WARNING:", "ERROR:", "DEBUG:", "FATAL:", "PANIC:"];

/// WAL-G marks delta backups with `_D_<parent segment>` in the name.
const DELTA_NAME_MARKER: &str = "_D_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Delta,
}

/// One base backup known to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    /// `None` when no timestamp could be recovered; such records are never
    /// considered old.
    pub created_at: Option<DateTime<Utc>>,
    pub kind: BackupKind,
    pub size_bytes: Option<u64>,
}

impl BackupRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let created_at = parse_name_timestamp(&name);
        let kind = kind_from_name(&name);
        Self {
            name,
            created_at,
            kind,
            size_bytes: None,
        }
    }

    /// Parse one `backup-list` row. The name is the first field; when the name
    /// carries no timestamp, the second field is tried as RFC 3339.
    pub fn from_listing_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let name = fields.next()?;
        if name == "name" || is_log_line(name) {
            return None;
        }

        let mut record = Self::new(name);
        if record.created_at.is_none() {
            record.created_at = fields
                .next()
                .and_then(|f| DateTime::parse_from_rfc3339(f).ok())
                .map(|t| t.with_timezone(&Utc));
        }
        Some(record)
    }

    pub fn is_full(&self) -> bool {
        self.kind == BackupKind::Full
    }
}

impl fmt::Display for BackupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Parse `backup-list` output into records, preserving listing order.
pub fn parse_listing(output: &str) -> Vec<BackupRecord> {
    output
        .lines()
        .filter_map(BackupRecord::from_listing_line)
        .collect()
}

/// Find a `YYYYMMDDTHHMMSSZ` token among the `_`-separated parts of a name.
pub fn parse_name_timestamp(name: &str) -> Option<DateTime<Utc>> {
    name.split('_')
        .find_map(|part| NaiveDateTime::parse_from_str(part, NAME_TIMESTAMP_FORMAT).ok())
        .map(|naive| naive.and_utc())
}

fn is_log_line(first_field: &str) -> bool {
    first_field.ends_with(':')
        || LOG_LEVEL_PREFIXES
            .iter()
            .any(|p| first_field.starts_with(p))
}

fn kind_from_name(name: &str) -> BackupKind {
    if name.contains(DELTA_NAME_MARKER) {
        BackupKind::Delta
    } else {
        BackupKind::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_name_timestamp() {
        let record = BackupRecord::new("base_20240105T120000Z");
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap())
        );
        assert!(record.is_full());
    }

    #[test]
    fn test_unparseable_name() {
        let record = BackupRecord::new("base_000000010000000000000004");
        assert_eq!(record.created_at, None);
        assert_eq!(BackupRecord::new("base_2024-01-05").created_at, None);
    }

    #[test]
    fn test_delta_kind() {
        let record = BackupRecord::new("base_000000010000000000000007_D_000000010000000000000004");
        assert_eq!(record.kind, BackupKind::Delta);
    }

    #[test]
    fn test_parse_walg_listing() {
        let output = "\
name                                                     modified             wal_segment_backup_start
base_000000010000000000000002                            2024-01-01T00:00:00Z 000000010000000000000002
base_000000010000000000000004_D_000000010000000000000002 2024-01-02T00:00:00Z 000000010000000000000004

base_20240103T000000Z                                    garbage              000000010000000000000006
";
        let records = parse_listing(output);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "base_000000010000000000000002");
        assert_eq!(
            records[0].created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(records[1].kind, BackupKind::Delta);
        assert_eq!(
            records[2].created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_empty_listing() {
        assert!(parse_listing("").is_empty());
        assert!(parse_listing("name modified wal_segment_backup_start\n").is_empty());
    }

    #[test]
    fn test_log_lines_are_not_backups() {
        let output = "\
name                  modified             wal_segment_backup_start
base_20240101T000000Z 2024-01-01T00:00:00Z 000000010000000000000002
WARNING: 2024/03/01 00:00:00.000000 storage is slow
INFO: 2024/03/01 00:00:00.000000 No backups found
";
        let names: Vec<String> = parse_listing(output).into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["base_20240101T000000Z"]);
        assert!(parse_listing("INFO: 2024/03/01 00:00:00.000000 No backups found\n").is_empty());
    }
}
