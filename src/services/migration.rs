//! One-time sweeps that rewrite stored records into the current encoding.
//!
//! Both sweeps keep going past a bad record and report counts at the end.
//! The remote sweep overwrites documents in place and cannot be undone.

use serde::Serialize;

use crate::models::daily_log::date_key;
use crate::storage::RemoteResult;
use crate::store::{next_stamp, FoodLogStore};
use crate::validation::validate_and_migrate;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl MigrationReport {
    fn fail(&mut self, label: &str, error: impl std::fmt::Display) {
        self.failed += 1;
        self.errors.push(format!("{label}: {error}"));
    }
}

/// Rewrite every local backup entry that still carries a legacy encoding.
pub async fn migrate_local_backup(store: &FoodLogStore) -> MigrationReport {
    let backup = store.backup();
    let mut report = MigrationReport::default();

    for date in backup.dates() {
        report.scanned += 1;
        let label = date_key(date);
        let Some(raw) = backup.load(date) else {
            report.fail(&label, "backup entry is unreadable");
            continue;
        };
        let migrated = match validate_and_migrate(&raw) {
            Ok(m) => m,
            Err(e) => {
                report.fail(&label, e);
                continue;
            }
        };
        if !migrated.was_migrated() {
            report.unchanged += 1;
            continue;
        }

        let mut log = migrated.log;
        log.updated_at = next_stamp(Some(log.updated_at));
        if backup.save(date, &log) {
            store.record_migration(date, &migrated.changes).await;
            report.migrated += 1;
        } else {
            report.fail(&label, "backup write failed");
        }
    }

    tracing::info!(
        scanned = report.scanned,
        migrated = report.migrated,
        failed = report.failed,
        "Local backup migration finished"
    );
    report
}

/// Rewrite every remote document of `user_id` that still carries a legacy
/// encoding. Fails only when the documents cannot be listed at all.
pub async fn migrate_remote(store: &FoodLogStore, user_id: &str) -> RemoteResult<MigrationReport> {
    let Some(remote) = store.remote() else {
        return Ok(MigrationReport::default());
    };
    let docs = remote.get_all(user_id).await?;
    let mut report = MigrationReport::default();

    for raw in docs {
        report.scanned += 1;
        let label = raw
            .get("date")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown date")
            .to_string();
        let migrated = match validate_and_migrate(&raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(user_id = %user_id, date = %label, record = %raw, "Remote record cannot be migrated");
                report.fail(&label, e);
                continue;
            }
        };
        if !migrated.was_migrated() {
            report.unchanged += 1;
            continue;
        }

        let mut log = migrated.log;
        log.user_id = Some(user_id.to_string());
        log.updated_at = next_stamp(Some(log.updated_at));
        match remote.upsert(&log).await {
            Ok(_) => {
                store.record_migration(log.date, &migrated.changes).await;
                report.migrated += 1;
            }
            Err(e) => report.fail(&label, e),
        }
    }

    tracing::info!(
        user_id = %user_id,
        scanned = report.scanned,
        migrated = report.migrated,
        failed = report.failed,
        "Remote migration finished"
    );
    Ok(report)
}
