// pgbackuptool/src/retention/mod.rs
use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use std::fs;

use crate::catalog::BackupCatalog;

pub const RETENTION_REASON: &str = "retention expired";

/// What one pruning pass did, built fresh per run and folded into the next
/// webhook payload.
#[derive(Debug, Default)]
pub struct RetentionReport {
    /// `(artifact name, reason)` per deleted artifact, in listing order.
    pub deleted: Vec<(String, String)>,
    /// `(artifact name, error)` per artifact that could not be deleted.
    pub failed: Vec<(String, String)>,
}

/// Deletes every artifact strictly older than the retention window,
/// optionally scoped to one database. An artifact aged exactly
/// `retention_days` is kept. Deletion is best-effort per artifact: one
/// failure is recorded and the rest of the pass continues.
pub fn prune(
    catalog: &BackupCatalog,
    retention_days: i64,
    database: Option<&str>,
    now: NaiveDateTime,
) -> Result<RetentionReport> {
    let window = Duration::days(retention_days);
    let mut report = RetentionReport::default();

    for artifact in catalog.list(database)? {
        let age = now - artifact.created_at;
        if age <= window {
            continue;
        }
        match fs::remove_file(&artifact.path) {
            Ok(()) => report
                .deleted
                .push((artifact.file_name(), RETENTION_REASON.to_string())),
            Err(e) => report.failed.push((artifact.file_name(), e.to_string())),
        }
    }
    Ok(report)
}
