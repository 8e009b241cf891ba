//! Retention policy engine.
//!
//! Pure decision logic over a listing of backups in creation order. Two
//! rules are combined with OR-keep semantics:
//!
//! - **age**: backups strictly older than `now - max_age_days` are
//!   candidates, up to the first backup that is not old (the boundary).
//!   If every backup is old the newest one is kept.
//! - **count**: the newest `retain_full` full backups are protected no
//!   matter their age.
//!
//! The deletion set is always a prefix of the listing, because the store's
//! delete primitive removes everything before a given backup and a delta
//! cannot outlive the full backup it chains from.

use crate::models::backup::BackupRecord;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: Option<u32>,
    pub retain_full: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Oldest backup kept by the age rule, if the age rule is active.
    pub boundary: Option<BackupRecord>,
    /// Backups to delete, oldest first.
    pub to_delete: Vec<BackupRecord>,
    /// Oldest surviving backup; `delete before` this one applies the decision.
    pub delete_before: Option<BackupRecord>,
    /// Count threshold this decision honoured.
    pub keep_count: usize,
    /// False only if the decision would remove every backup. Never false in practice.
    pub deletion_safe: bool,
    /// Names whose timestamp could not be parsed.
    pub unparseable: Vec<String>,
}

impl RetentionDecision {
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty()
    }
}

impl RetentionPolicy {
    pub fn new(max_age_days: Option<u32>, retain_full: usize) -> Self {
        Self {
            max_age_days,
            retain_full,
        }
    }

    /// Decide which backups may be deleted as of `now`.
    pub fn plan(&self, backups: &[BackupRecord], now: DateTime<Utc>) -> RetentionDecision {
        let unparseable: Vec<String> = backups
            .iter()
            .filter(|b| b.created_at.is_none())
            .map(|b| b.name.clone())
            .collect();
        for name in &unparseable {
            warn!(backup = %name, "Backup timestamp could not be parsed, keeping it");
        }

        let mut decision = RetentionDecision {
            keep_count: self.retain_full,
            deletion_safe: true,
            unparseable,
            ..Default::default()
        };
        if backups.is_empty() {
            return decision;
        }

        let age_boundary = self.age_boundary(backups, now);
        decision.boundary = age_boundary.map(|i| backups[i].clone());

        let candidates = age_boundary.unwrap_or(0);
        let protected_from = self.oldest_protected(backups).unwrap_or(backups.len());
        let first_survivor = chain_base(backups, candidates.min(protected_from));

        decision.to_delete = backups[..first_survivor].to_vec();
        decision.delete_before = if first_survivor > 0 {
            backups.get(first_survivor).cloned()
        } else {
            None
        };
        decision.deletion_safe = first_survivor < backups.len();
        decision
    }

    /// Backups that `retain FULL <n>` alone would remove, oldest first.
    pub fn plan_count_only(&self, backups: &[BackupRecord]) -> Vec<BackupRecord> {
        let protected_from = self.oldest_protected(backups).unwrap_or(backups.len());
        backups[..chain_base(backups, protected_from)].to_vec()
    }

    /// Threshold for the tool's `retain FULL <n>` pass that follows the age
    /// pass. With an age policy it never drops below the number of full
    /// backups the age pass keeps, so the count pass cannot undo OR-keep.
    pub fn retain_threshold(&self, backups: &[BackupRecord], decision: &RetentionDecision) -> usize {
        if self.max_age_days.is_none() {
            return self.retain_full;
        }
        let surviving_fulls = backups[decision.to_delete.len().min(backups.len())..]
            .iter()
            .filter(|b| b.is_full())
            .count();
        self.retain_full.max(surviving_fulls)
    }

    /// Index of the oldest backup the age rule keeps, or `None` when the
    /// age rule is disabled.
    fn age_boundary(&self, backups: &[BackupRecord], now: DateTime<Utc>) -> Option<usize> {
        let days = self.max_age_days?;
        let cutoff = now - Duration::days(i64::from(days));

        let boundary = backups
            .iter()
            .position(|b| !b.created_at.is_some_and(|t| t < cutoff))
            // Everything is old: the newest one still survives.
            .unwrap_or(backups.len() - 1);
        Some(boundary)
    }

    /// Index of the oldest count-protected backup. With fewer full backups
    /// than the threshold, everything is protected.
    fn oldest_protected(&self, backups: &[BackupRecord]) -> Option<usize> {
        if self.retain_full == 0 {
            return None;
        }
        let fulls: Vec<usize> = backups
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_full())
            .map(|(i, _)| i)
            .collect();

        if fulls.len() < self.retain_full {
            return Some(0);
        }
        Some(fulls[fulls.len() - self.retain_full])
    }
}

/// Move a survivor index back onto a full backup so no surviving delta loses
/// its base. With no older full, nothing before `index` can go.
fn chain_base(backups: &[BackupRecord], index: usize) -> usize {
    if index == 0 || index >= backups.len() || backups[index].is_full() {
        return index;
    }
    backups[..index]
        .iter()
        .rposition(|b| b.is_full())
        .unwrap_or(0)
}
