//! Text heuristics over backup tool output.
//!
//! WAL-G reports what it did only in log lines, so these functions match
//! known substrings. Keep every marker here so a wording change upstream is
//! a one-file fix.

/// Backup type as reported by `backup-push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Full,
    Delta,
    Unknown,
}

/// How a failed delete invocation should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Nothing matched the delete target; not an error.
    BenignEmpty,
    RealFailure,
}

const DELTA_MARKERS: &[&str] = &[
    "delta backup from",
    "for the current delta backup",
    "doing delta backup",
];

const FULL_MARKERS: &[&str] = &["doing full backup", "full backup"];

const NOTHING_TO_DELETE_MARKERS: &[&str] = &[
    "no backups found",
    "no backup found",
    "nothing to delete",
    "there are no backups",
    "no backups to delete",
    "no objects to delete",
];

/// Signatures of a delta push refused because the cluster no longer matches
/// the parent backup (typically after the database was re-initialized).
const IDENTITY_MISMATCH_MARKERS: &[&str] = &[
    "system identifier",
    "systemidentifier",
    "lsn mismatch",
    "is less than previous backup lsn",
    "than the lsn of the base backup",
    "different timeline",
];

/// Classify a successful push by its log lines. Delta markers win because
/// WAL-G also mentions "full backup" while looking for a delta base.
pub fn classify_push(output: &str) -> PushKind {
    let text = output.to_lowercase();
    if DELTA_MARKERS.iter().any(|m| text.contains(m)) {
        PushKind::Delta
    } else if FULL_MARKERS.iter().any(|m| text.contains(m)) {
        PushKind::Full
    } else {
        PushKind::Unknown
    }
}

pub fn classify_delete(output: &str) -> DeleteOutcome {
    let text = output.to_lowercase();
    if NOTHING_TO_DELETE_MARKERS.iter().any(|m| text.contains(m)) {
        DeleteOutcome::BenignEmpty
    } else {
        DeleteOutcome::RealFailure
    }
}

pub fn is_identity_mismatch(output: &str) -> bool {
    let text = output.to_lowercase();
    IDENTITY_MISMATCH_MARKERS.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_push() {
        assert_eq!(
            classify_push("INFO: 2024/01/01 Doing full backup.\nINFO: Wrote backup with name base_1"),
            PushKind::Full
        );
        assert_eq!(
            classify_push(
                "INFO: Selecting the latest backup as the base for the current delta backup...\n\
                 INFO: Delta backup from base_000000010000000000000002 with LSN 0/2000028."
            ),
            PushKind::Delta
        );
        assert_eq!(classify_push("INFO: Wrote backup with name base_1"), PushKind::Unknown);
        assert_eq!(classify_push(""), PushKind::Unknown);
    }

    #[test]
    fn test_classify_delete() {
        assert_eq!(
            classify_delete("ERROR: No backups found in storage"),
            DeleteOutcome::BenignEmpty
        );
        assert_eq!(classify_delete("Nothing to delete"), DeleteOutcome::BenignEmpty);
        assert_eq!(
            classify_delete("ERROR: ssh: handshake failed"),
            DeleteOutcome::RealFailure
        );
    }

    #[test]
    fn test_identity_mismatch() {
        assert!(is_identity_mismatch(
            "ERROR: Current database system identifier 7312 differs from the one in base backup"
        ));
        assert!(is_identity_mismatch("ERROR: LSN mismatch with parent backup"));
        assert!(!is_identity_mismatch("ERROR: disk full"));
    }
}
