//! PostgreSQL-in-Docker Backup/Restore Tool
//!
//! Provides CLI interface for container-aware backup, restore, listing and
//! retention pruning operations

// pgbackuptool/src/main.rs
mod backup;
mod catalog;
mod config;
mod engine;
mod errors;
mod lock;
mod locator;
mod notify;
mod restore;
mod retention;
mod utils;

use anyhow::{Context, Result};
use chrono::Local;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use catalog::BackupCatalog;
use config::AppConfig;
use engine::{BackupMode, DockerEngine};
use errors::AppError;
use notify::{DEAD_LETTER_FILE, Notifier, WebhookReport};
use restore::RestoreRequest;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json in the working directory, next to the executable
    // or the project root when running with `cargo run`.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };
    let rest: Vec<String> = args.iter().skip(2).cloned().collect();

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n⚠️ Ctrl-C received; stopping before the next database.");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let (database, mode) = parse_backup_args(&rest)?;
            let engine = connect_engine(&app_config)?;
            backup::run_backup_flow(&app_config, &engine, database.as_deref(), &mode, &cancel)
                .await
                .context("Backup process failed")?;
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let request = build_restore_request(&app_config, &rest)?;
            let engine = connect_engine(&app_config)?;
            restore::run_restore_flow(&app_config, &engine, &request)
                .await
                .context("Restore process failed")?;
        }
        "3" | "list" => {
            let database = rest.iter().find(|a| !a.starts_with("--")).cloned();
            list_backups(&app_config, database.as_deref())?;
        }
        "4" | "prune" => {
            println!("🗑 Starting Retention Prune...");
            let database = rest.iter().find(|a| !a.starts_with("--")).cloned();
            run_prune(&app_config, database.as_deref())
                .await
                .context("Prune process failed")?;
        }
        _ => {
            println!(
                "❌ Invalid choice. Please enter '1' (backup), '2' (restore), '3' (list) or '4' (prune)."
            );
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Resolves the target container and builds the docker-exec engine for it.
/// When several PostgreSQL containers are running and the config does not
/// narrow them down to one, the operator is asked to pick.
fn connect_engine(app_config: &AppConfig) -> Result<DockerEngine> {
    let candidates = locator::discover_postgres_containers(app_config.container_name.as_deref())?;
    let target = match locator::locate(&candidates, None) {
        Ok(name) => name,
        Err(AppError::AmbiguousTarget { candidates }) => {
            let selection = prompt_container_selection(&candidates)?;
            locator::locate(&candidates, Some(selection.as_str()))?
        }
        Err(e) => return Err(e.into()),
    };
    println!("🐳 Target container: {}", target);
    DockerEngine::new(
        target,
        app_config.postgres_user.clone(),
        app_config.postgres_password.clone(),
    )
}

fn parse_backup_args(rest: &[String]) -> Result<(Option<String>, BackupMode)> {
    let mut database = None;
    let mut mode = BackupMode::Full;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--schema-only" => mode = BackupMode::SchemaOnly,
            "--tables" => {
                let tables: Vec<String> = iter
                    .next()
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                mode = BackupMode::TableSubset(tables);
            }
            other if !other.starts_with("--") && database.is_none() => {
                database = Some(other.to_string());
            }
            other => anyhow::bail!("Unrecognized backup argument: {}", other),
        }
    }
    Ok((database, mode))
}

/// Builds the restore request: database and artifact index from the command
/// line when given, interactive prompts otherwise. Confirmation requires
/// either `--yes` or typing the database name back.
fn build_restore_request(app_config: &AppConfig, rest: &[String]) -> Result<RestoreRequest> {
    let assume_yes = rest.iter().any(|a| a == "--yes");
    let positional: Vec<&String> = rest.iter().filter(|a| !a.starts_with("--")).collect();

    let database = match positional.first() {
        Some(db) => db.to_string(),
        None => prompt_line("Database to restore: ")?,
    };

    let catalog = BackupCatalog::new(app_config.backup_dir.clone());
    let list = catalog.list(Some(database.as_str()))?;
    if list.is_empty() {
        anyhow::bail!(
            "No backups found for database '{}' in {}",
            database,
            app_config.backup_dir.display()
        );
    }

    println!("Available backups for {}:", database);
    for (i, artifact) in list.iter().enumerate() {
        println!(
            "{:3}. {} ({})",
            i + 1,
            artifact.file_name(),
            notify::human_size(artifact.size_bytes)
        );
    }

    let index: usize = match positional.get(1) {
        Some(raw) => raw
            .parse()
            .context("Backup index must be a positive number")?,
        None => prompt_line("Backup number to restore: ")?
            .parse()
            .context("Backup index must be a positive number")?,
    };
    let artifact = BackupCatalog::select_by_index(&list, index)?.clone();

    let confirmed = assume_yes || {
        let answer = prompt_line(&format!(
            "⚠️ This will overwrite data in '{}'. Type the database name to confirm: ",
            database
        ))?;
        answer == database
    };

    Ok(RestoreRequest {
        target_database: database,
        artifact,
        confirmed,
    })
}

fn list_backups(app_config: &AppConfig, database: Option<&str>) -> Result<()> {
    let catalog = BackupCatalog::new(app_config.backup_dir.clone());
    let list = catalog.list(database)?;
    if list.is_empty() {
        println!("No backups found in {}", app_config.backup_dir.display());
        return Ok(());
    }
    for (i, artifact) in list.iter().enumerate() {
        println!(
            "{:3}. {} [{}] ({})",
            i + 1,
            artifact.file_name(),
            artifact.database,
            notify::human_size(artifact.size_bytes)
        );
    }
    Ok(())
}

async fn run_prune(app_config: &AppConfig, database: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(&app_config.backup_dir).with_context(|| {
        format!(
            "Failed to create backup directory: {}",
            app_config.backup_dir.display()
        )
    })?;
    let _lock = lock::DirectoryLock::acquire(&app_config.backup_dir)?;
    let catalog = BackupCatalog::new(app_config.backup_dir.clone());
    let now = Local::now().naive_local();

    let report = retention::prune(&catalog, app_config.retention_days, database, now)?;
    for (name, reason) in &report.deleted {
        println!("🗑 Deleted expired backup {} ({})", name, reason);
    }
    for (name, error) in &report.failed {
        eprintln!("⚠️ Could not delete expired backup {}: {}", name, error);
    }
    if report.deleted.is_empty() && report.failed.is_empty() {
        println!("Nothing to prune; all backups are within the retention window.");
    }

    let notifier = Notifier::new(
        app_config.webhook_url.clone(),
        app_config.backup_dir.join(DEAD_LETTER_FILE),
    )?;
    let payload = WebhookReport::for_prune(
        database.unwrap_or("ALL"),
        now,
        app_config.retention_days,
        &report,
    );
    notifier.notify(&payload).await;
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. List Backups (or type 'list')");
    println!("4. Prune Expired Backups (or type 'prune')");
    prompt_line("Enter your choice: ")
}

fn prompt_container_selection(candidates: &[String]) -> Result<String> {
    println!("Several PostgreSQL containers are running:");
    for (i, name) in candidates.iter().enumerate() {
        println!("{:3}. {}", i + 1, name);
    }
    let answer = prompt_line("Select a container (number or name): ")?;
    if let Ok(number) = answer.parse::<usize>() {
        if number >= 1 && number <= candidates.len() {
            return Ok(candidates[number - 1].clone());
        }
    }
    Ok(answer)
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::{Write, stdin, stdout};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
