use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use tempfile::Builder as TempFileBuilder;

use crate::backup::JobStatus;
use crate::backup::archive;
use crate::catalog::{BackupArtifact, CLUSTER_SCOPE};
use crate::config::AppConfig;
use crate::engine::{DatabaseEngine, is_valid_database_name};
use crate::errors::AppError;
use crate::lock::DirectoryLock;
use crate::notify::{DEAD_LETTER_FILE, Notifier, WebhookReport};
use crate::utils::logfile::StatusLog;

/// A fully specified restore: which artifact goes into which database, and
/// whether the operator actually confirmed the destructive part.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub target_database: String,
    pub artifact: BackupArtifact,
    pub confirmed: bool,
}

#[derive(Debug)]
pub struct RestoreJobResult {
    pub status: JobStatus,
    pub database: String,
    pub artifact_name: String,
    pub error_detail: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Replays one artifact into the target database.
///
/// Gates on explicit confirmation before any side effect. The target
/// database is created when absent (restoring into a missing database is a
/// supported case). Other sessions are terminated first so the replay does
/// not trip over open locks; a termination failure is logged and the
/// restore proceeds. Compressed artifacts are decompressed into a scratch
/// directory that is removed on every exit path.
pub fn execute_restore(
    engine: &dyn DatabaseEngine,
    request: &RestoreRequest,
    now: NaiveDateTime,
) -> std::result::Result<RestoreJobResult, AppError> {
    let database = request.target_database.as_str();
    if !request.confirmed {
        return Err(AppError::NotConfirmed(database.to_string()));
    }

    // Whole-cluster dumps are self-describing scripts (they create their own
    // databases), so they replay through the maintenance database.
    let cluster = request.artifact.database == CLUSTER_SCOPE;
    let replay_db = if cluster { "postgres" } else { database };
    if !is_valid_database_name(replay_db) {
        return Err(AppError::InvalidInput(format!(
            "invalid database name: {:?}",
            replay_db
        )));
    }

    if !cluster {
        if !engine.database_exists(database)? {
            println!("Database '{}' does not exist on the target server.", database);
            engine.create_database(database)?;
        }
        if let Err(e) = engine.terminate_sessions(database) {
            eprintln!(
                "⚠️ Could not terminate sessions on '{}' (continuing): {}",
                database, e
            );
        }
    }

    let scratch = TempFileBuilder::new()
        .prefix(&format!("restore_{}_", replay_db))
        .tempdir()
        .map_err(AppError::Io)?;

    let replay_path = if request.artifact.compressed {
        let file_name = request.artifact.file_name();
        let body_name = file_name.strip_suffix(".gz").unwrap_or(&file_name).to_string();
        archive::decompress_gz_file(&request.artifact.path, &scratch.path().join(body_name))?
    } else {
        request.artifact.path.clone()
    };

    println!(
        "Replaying {} into database '{}'...",
        request.artifact.file_name(),
        replay_db
    );
    let result = match engine.replay(replay_db, &replay_path) {
        Ok(()) => {
            println!("✓ Successfully restored '{}' from {}", database, request.artifact.file_name());
            RestoreJobResult {
                status: JobStatus::Success,
                database: database.to_string(),
                artifact_name: request.artifact.file_name(),
                error_detail: None,
                timestamp: now,
            }
        }
        Err(AppError::RestoreFailed { stderr, .. }) => {
            eprintln!("❌ Restore of '{}' failed: {}", database, stderr);
            RestoreJobResult {
                status: JobStatus::Failure,
                database: database.to_string(),
                artifact_name: request.artifact.file_name(),
                error_detail: Some(stderr),
                timestamp: now,
            }
        }
        Err(other) => return Err(other),
    };
    // `scratch` drops here, on success and failure alike.
    Ok(result)
}

pub async fn perform_restore_orchestration(
    app_config: &AppConfig,
    engine: &dyn DatabaseEngine,
    request: &RestoreRequest,
) -> Result<()> {
    println!(
        "🔄 Starting restore of database '{}' from {}",
        request.target_database,
        request.artifact.file_name()
    );

    let _lock = DirectoryLock::acquire(&app_config.backup_dir)?;
    let status_log = StatusLog::new(app_config.log_file.clone());
    let notifier = Notifier::new(
        app_config.webhook_url.clone(),
        app_config.backup_dir.join(DEAD_LETTER_FILE),
    )?;

    let now = Local::now().naive_local();
    let result = match execute_restore(engine, request, now) {
        Ok(result) => result,
        Err(AppError::NotConfirmed(database)) => {
            println!("ℹ️ Restore of '{}' was not confirmed; nothing was changed.", database);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match result.status {
        JobStatus::Success => status_log.append(&format!(
            "Restore of {} from {} succeeded",
            result.database, result.artifact_name
        )),
        JobStatus::Failure => status_log.append(&format!(
            "Restore of {} from {} FAILED: {}",
            result.database,
            result.artifact_name,
            result.error_detail.as_deref().unwrap_or("unknown error")
        )),
    }

    let report = WebhookReport::for_restore(&result, app_config.retention_days);
    if !notifier.notify(&report).await {
        status_log.append(&format!(
            "Webhook notification for restore of {} could not be delivered",
            result.database
        ));
    }

    if result.status == JobStatus::Failure {
        anyhow::bail!(
            "Restore of '{}' failed: {}",
            result.database,
            result.error_detail.unwrap_or_default()
        );
    }
    println!("\n🎉 Restore completed successfully");
    Ok(())
}
