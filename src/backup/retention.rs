//! Archive retention policy
//!
//! A pure decision over the current archive list: the newest
//! `scheduled_count` scheduled archives are kept, every older scheduled
//! archive is pruned, and manual/initial archives are always kept.

use super::manager::BackupInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub scheduled_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { scheduled_count: 7 }
    }
}

/// Which archives to keep and which to delete
#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    pub keep: Vec<BackupInfo>,
    pub prune: Vec<BackupInfo>,
}

impl RetentionPolicy {
    pub fn new(scheduled_count: usize) -> Self {
        Self { scheduled_count }
    }

    /// Split `backups` into keep and prune sets
    ///
    /// Input order does not matter; both sets come back newest first.
    pub fn plan(&self, backups: &[BackupInfo]) -> RetentionPlan {
        let mut sorted: Vec<BackupInfo> = backups.to_vec();
        sorted.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        let mut plan = RetentionPlan::default();
        let mut scheduled_seen = 0;
        for backup in sorted {
            if backup.kind.is_prunable() {
                scheduled_seen += 1;
                if scheduled_seen > self.scheduled_count {
                    plan.prune.push(backup);
                    continue;
                }
            }
            plan.keep.push(backup);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{archive_file_name, BackupKind};
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    fn info(kind: BackupKind, minute: i64) -> BackupInfo {
        let created_at = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        let filename = archive_file_name(kind, created_at);
        BackupInfo {
            path: PathBuf::from("/backups").join(&filename),
            filename,
            kind,
            created_at,
            size_bytes: 100,
        }
    }

    #[test]
    fn test_keeps_newest_scheduled() {
        let mut backups: Vec<BackupInfo> = (0..10).map(|m| info(BackupKind::Scheduled, m)).collect();
        backups.push(info(BackupKind::Manual, 1));
        backups.push(info(BackupKind::Initial, 0));

        let plan = RetentionPolicy::default().plan(&backups);

        assert_eq!(plan.prune.len(), 3);
        assert_eq!(plan.keep.len(), 9);
        assert!(plan.prune.iter().all(|b| b.kind == BackupKind::Scheduled));
        // The three oldest scheduled archives go
        let pruned_minutes: Vec<u32> = plan
            .prune
            .iter()
            .map(|b| chrono::Timelike::minute(&b.created_at))
            .collect();
        assert_eq!(pruned_minutes, vec![2, 1, 0]);
    }

    #[test]
    fn test_manual_and_initial_are_exempt() {
        let backups: Vec<BackupInfo> = (0..20)
            .map(|m| info(if m % 2 == 0 { BackupKind::Manual } else { BackupKind::Initial }, m))
            .collect();

        let plan = RetentionPolicy::new(1).plan(&backups);
        assert!(plan.prune.is_empty());
        assert_eq!(plan.keep.len(), 20);
    }

    #[test]
    fn test_under_limit_prunes_nothing() {
        let backups: Vec<BackupInfo> = (0..3).map(|m| info(BackupKind::Scheduled, m)).collect();
        let plan = RetentionPolicy::default().plan(&backups);
        assert!(plan.prune.is_empty());
        assert_eq!(plan.keep[0].created_at, backups[2].created_at);
    }

    #[test]
    fn test_empty() {
        let plan = RetentionPolicy::default().plan(&[]);
        assert!(plan.keep.is_empty() && plan.prune.is_empty());
    }
}
