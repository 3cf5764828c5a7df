pub(crate) mod archive;
mod logic;

pub use logic::{BackupJobResult, JobStatus, execute_backup, run_single_backup};

use anyhow::Result;
use std::sync::atomic::AtomicBool;

use crate::config::AppConfig;
use crate::engine::{BackupMode, DatabaseEngine};

/// Public entry point for the backup process.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    engine: &dyn DatabaseEngine,
    database: Option<&str>,
    mode: &BackupMode,
    cancel: &AtomicBool,
) -> Result<()> {
    logic::perform_backup_orchestration(app_config, engine, database, mode, cancel).await
}
