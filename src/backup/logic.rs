use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use sysinfo::Disks;

use crate::catalog::{self, BackupArtifact, BackupCatalog, CLUSTER_SCOPE, PARTIAL_SUFFIX};
use crate::config::AppConfig;
use crate::engine::{BackupMode, DatabaseEngine, DumpTarget};
use crate::errors::AppError;
use crate::lock::DirectoryLock;
use crate::notify::{DEAD_LETTER_FILE, Notifier, WebhookReport};
use crate::retention;
use crate::utils::logfile::StatusLog;

use super::archive;

/// Free space required on the backup volume before a dump is attempted.
pub const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
}

/// Outcome of one database's backup, consumed by the notifier and the log.
#[derive(Debug)]
pub struct BackupJobResult {
    pub status: JobStatus,
    pub database: String,
    pub artifact: Option<BackupArtifact>,
    pub error_detail: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Dumps one database (or the whole cluster for the `ALL` name) into the
/// backup directory.
///
/// The dump streams through a gzip encoder into a `.part` file and is
/// renamed to its final catalog name only on success, so a failed or
/// interrupted dump is never visible in the catalog. The `.part` file is
/// kept on failure for operator inspection.
pub fn execute_backup(
    engine: &dyn DatabaseEngine,
    backup_dir: &Path,
    database: &str,
    mode: &BackupMode,
    now: NaiveDateTime,
) -> std::result::Result<BackupArtifact, AppError> {
    let target = if database == CLUSTER_SCOPE {
        DumpTarget::Cluster
    } else {
        DumpTarget::Database(database.to_string())
    };

    // Input gates come before any filesystem side effect.
    if let BackupMode::TableSubset(tables) = mode {
        if target == DumpTarget::Cluster {
            return Err(AppError::InvalidInput(
                "a table subset cannot be dumped from the whole cluster".to_string(),
            ));
        }
        if tables.is_empty() {
            return Err(AppError::InvalidInput(
                "table subset backup requested with an empty table list".to_string(),
            ));
        }
    }
    if let DumpTarget::Database(name) = &target {
        if !crate::engine::is_valid_database_name(name) {
            return Err(AppError::InvalidInput(format!(
                "invalid database name: {:?}",
                name
            )));
        }
    }

    fs::create_dir_all(backup_dir).map_err(AppError::Io)?;
    check_disk_space(backup_dir)?;

    let final_name = catalog::encode_artifact_name(database, now);
    let final_path = backup_dir.join(&final_name);
    let part_path = backup_dir.join(format!("{}{}", final_name, PARTIAL_SUFFIX));

    let size_bytes = archive::compress_stream_to_file(&part_path, |sink| {
        engine.dump(&target, mode, sink)
    })?;

    fs::rename(&part_path, &final_path).map_err(AppError::Io)?;

    Ok(BackupArtifact {
        database: database.to_string(),
        created_at: now,
        path: final_path,
        size_bytes,
        compressed: true,
    })
}

/// Runs one database's backup and folds any error into a result record, so
/// a batch run can continue with the next database.
pub fn run_single_backup(
    engine: &dyn DatabaseEngine,
    backup_dir: &Path,
    database: &str,
    mode: &BackupMode,
    now: NaiveDateTime,
) -> BackupJobResult {
    println!("🔍 Backing up database: {}", database);
    match execute_backup(engine, backup_dir, database, mode, now) {
        Ok(artifact) => {
            println!(
                "✓ Successfully backed up {} to {} ({} bytes)",
                database,
                artifact.file_name(),
                artifact.size_bytes
            );
            BackupJobResult {
                status: JobStatus::Success,
                database: database.to_string(),
                artifact: Some(artifact),
                error_detail: None,
                timestamp: now,
            }
        }
        Err(e) => {
            eprintln!("❌ Backup of {} failed: {}", database, e);
            BackupJobResult {
                status: JobStatus::Failure,
                database: database.to_string(),
                artifact: None,
                error_detail: Some(e.to_string()),
                timestamp: now,
            }
        }
    }
}

/// Main backup flow: resolve the database set, back up each one, prune its
/// expired artifacts and send one webhook report per database. Failures are
/// per-database; the batch keeps going and the run fails at the end if any
/// database did.
pub async fn perform_backup_orchestration(
    app_config: &AppConfig,
    engine: &dyn DatabaseEngine,
    database: Option<&str>,
    mode: &BackupMode,
    cancel: &AtomicBool,
) -> Result<()> {
    println!("🚀 Starting database backup process");
    fs::create_dir_all(&app_config.backup_dir).with_context(|| {
        format!(
            "Failed to create backup directory: {}",
            app_config.backup_dir.display()
        )
    })?;

    let _lock = DirectoryLock::acquire(&app_config.backup_dir)?;
    let status_log = StatusLog::new(app_config.log_file.clone());
    let catalog = BackupCatalog::new(app_config.backup_dir.clone());
    let notifier = Notifier::new(
        app_config.webhook_url.clone(),
        app_config.backup_dir.join(DEAD_LETTER_FILE),
    )?;

    let databases = resolve_database_set(app_config, engine, database)?;
    println!("Databases to be backed up: {:?}", databases);

    let mut failures = 0usize;
    for db_name in &databases {
        if cancel.load(Ordering::SeqCst) {
            println!("⚠️ Cancellation requested; stopping before database {}", db_name);
            status_log.append(&format!(
                "Backup run cancelled before database {}",
                db_name
            ));
            anyhow::bail!("Backup run cancelled");
        }

        let now = Local::now().naive_local();
        let result = run_single_backup(engine, catalog.dir(), db_name, mode, now);

        let retention_report =
            match retention::prune(&catalog, app_config.retention_days, Some(db_name.as_str()), now) {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("⚠️ Retention pruning for {} failed: {}", db_name, e);
                    retention::RetentionReport::default()
                }
            };
        for (name, reason) in &retention_report.deleted {
            println!("🗑 Deleted expired backup {} ({})", name, reason);
        }
        for (name, error) in &retention_report.failed {
            eprintln!("⚠️ Could not delete expired backup {}: {}", name, error);
        }

        match result.status {
            JobStatus::Success => status_log.append(&format!(
                "Backup of {} succeeded: {}",
                db_name,
                result
                    .artifact
                    .as_ref()
                    .map(|a| a.file_name())
                    .unwrap_or_default()
            )),
            JobStatus::Failure => {
                failures += 1;
                status_log.append(&format!(
                    "Backup of {} FAILED: {}",
                    db_name,
                    result.error_detail.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        let report =
            WebhookReport::for_backup(&result, app_config.retention_days, &retention_report);
        if !notifier.notify(&report).await {
            status_log.append(&format!(
                "Webhook notification for backup of {} could not be delivered",
                db_name
            ));
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} database backups failed", failures, databases.len());
    }
    println!("\n🎉 Backup completed successfully");
    Ok(())
}

/// Resolves which databases this run covers: an explicit CLI argument, the
/// configured list, or every non-template database on the server. System
/// databases are only included when named explicitly.
fn resolve_database_set(
    app_config: &AppConfig,
    engine: &dyn DatabaseEngine,
    database: Option<&str>,
) -> Result<Vec<String>> {
    let databases = match database {
        Some(db) => vec![db.to_string()],
        None => match &app_config.database_list {
            Some(list) => list.clone(),
            None => {
                println!("No specific databases listed in config, fetching all non-template databases...");
                let all = engine
                    .list_databases()
                    .context("Failed to list databases on the server")?;
                all.into_iter()
                    .filter(|name| !name.starts_with("template") && name != "postgres")
                    .collect()
            }
        },
    };
    if databases.is_empty() {
        anyhow::bail!("No databases found or specified to back up.");
    }
    Ok(databases)
}

fn check_disk_space(backup_dir: &Path) -> std::result::Result<(), AppError> {
    match available_disk_space(backup_dir) {
        Some(available) => ensure_free_space(available, MIN_FREE_DISK_BYTES),
        // The backing volume could not be identified; proceed and let the
        // write itself fail if space truly runs out.
        None => Ok(()),
    }
}

fn ensure_free_space(available: u64, required: u64) -> std::result::Result<(), AppError> {
    if available < required {
        return Err(AppError::DiskPressure {
            available,
            required,
        });
    }
    Ok(())
}

/// Free bytes on the volume holding `path`, picked as the disk with the
/// longest mount-point prefix of the canonicalized path.
fn available_disk_space(path: &Path) -> Option<u64> {
    let canonical = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeEngine;
    use chrono::NaiveDate;

    fn ts(y: i32, mo: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_successful_backup_publishes_exactly_one_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = FakeEngine::with_databases(&["shop"]);

        let artifact = execute_backup(
            &engine,
            dir.path(),
            "shop",
            &BackupMode::Full,
            ts(2025, 8, 7),
        )?;

        assert_eq!(artifact.database, "shop");
        assert!(artifact.size_bytes > 0);
        assert!(artifact.compressed);
        assert!(artifact.path.exists());

        let catalog = BackupCatalog::new(dir.path().to_path_buf());
        let list = catalog.list(Some("shop"))?;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], artifact);
        Ok(())
    }

    #[test]
    fn test_empty_table_subset_fails_without_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = FakeEngine::with_databases(&["shop"]);

        let result = execute_backup(
            &engine,
            dir.path(),
            "shop",
            &BackupMode::TableSubset(vec![]),
            ts(2025, 8, 7),
        );

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_table_subset_against_cluster_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = FakeEngine::with_databases(&["shop"]);

        let result = execute_backup(
            &engine,
            dir.path(),
            CLUSTER_SCOPE,
            &BackupMode::TableSubset(vec!["orders".to_string()]),
            ts(2025, 8, 7),
        );
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_failed_dump_leaves_sentinel_outside_the_catalog() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut engine = FakeEngine::with_databases(&["shop"]);
        engine.fail_dump = true;

        let result = execute_backup(
            &engine,
            dir.path(),
            "shop",
            &BackupMode::Full,
            ts(2025, 8, 7),
        );
        assert!(matches!(result, Err(AppError::DumpFailed { .. })));

        // The partial file stays for inspection but the catalog never sees it.
        let part_files: Vec<_> = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
            .collect();
        assert_eq!(part_files.len(), 1);

        let catalog = BackupCatalog::new(dir.path().to_path_buf());
        assert!(catalog.list(None)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_cluster_backup_uses_the_all_scope() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = FakeEngine::with_databases(&["shop"]);

        let artifact = execute_backup(
            &engine,
            dir.path(),
            CLUSTER_SCOPE,
            &BackupMode::Full,
            ts(2025, 8, 7),
        )?;
        assert_eq!(artifact.database, CLUSTER_SCOPE);
        assert!(!artifact.file_name().contains("ALL"));
        Ok(())
    }

    #[test]
    fn test_run_single_backup_converts_errors_to_failure_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = FakeEngine::with_databases(&["shop"]);
        engine.fail_dump = true;

        let result = run_single_backup(
            &engine,
            dir.path(),
            "shop",
            &BackupMode::Full,
            ts(2025, 8, 7),
        );
        assert_eq!(result.status, JobStatus::Failure);
        assert!(result.artifact.is_none());
        assert!(
            result
                .error_detail
                .as_deref()
                .is_some_and(|d| d.contains("pg_dump"))
        );
    }

    #[test]
    fn test_free_space_floor_is_strict() {
        assert!(ensure_free_space(MIN_FREE_DISK_BYTES, MIN_FREE_DISK_BYTES).is_ok());
        assert!(matches!(
            ensure_free_space(MIN_FREE_DISK_BYTES - 1, MIN_FREE_DISK_BYTES),
            Err(AppError::DiskPressure { .. })
        ));
    }
}
