mod logic;

pub use logic::{RestoreJobResult, RestoreRequest, execute_restore};

use anyhow::Result;

use crate::config::AppConfig;
use crate::engine::DatabaseEngine;

/// Public entry point for the restore process.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    engine: &dyn DatabaseEngine,
    request: &RestoreRequest,
) -> Result<()> {
    logic::perform_restore_orchestration(app_config, engine, request).await
}
