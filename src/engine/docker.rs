// pgbackuptool/src/engine/docker.rs
use anyhow::{Context, Result as AnyResult};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::{AppError, Result};
use crate::utils::find_docker_executable;

use super::{BackupMode, DatabaseEngine, DumpTarget, is_valid_database_name, is_valid_table_name};

/// Production `DatabaseEngine` implementation. Every operation runs the
/// PostgreSQL client tools inside the target container via `docker exec`;
/// nothing requires a published port or client tools on the host.
pub struct DockerEngine {
    docker_path: PathBuf,
    container: String,
    user: String,
    password: Option<String>,
}

impl DockerEngine {
    pub fn new(container: String, user: String, password: Option<String>) -> AnyResult<Self> {
        let docker_path = find_docker_executable()?;
        Ok(DockerEngine {
            docker_path,
            container,
            user,
            password,
        })
    }

    /// Builds `docker exec [-i] [-e PGPASSWORD=...] <container>` ready for
    /// the client tool and its arguments to be appended.
    fn exec_command(&self, interactive: bool) -> Command {
        let mut cmd = Command::new(&self.docker_path);
        cmd.arg("exec");
        if interactive {
            cmd.arg("-i");
        }
        if let Some(password) = &self.password {
            cmd.arg("-e").arg(format!("PGPASSWORD={}", password));
        }
        cmd.arg(&self.container);
        cmd
    }

    /// Runs a single SQL statement through psql against `database` and
    /// returns the unaligned, tuples-only output.
    fn run_sql(&self, database: &str, sql: &str) -> AnyResult<String> {
        let output = self
            .exec_command(false)
            .arg("psql")
            .arg("-X")
            .arg("-A")
            .arg("-t")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-U")
            .arg(&self.user)
            .arg("-d")
            .arg(database)
            .arg("-c")
            .arg(sql)
            .output()
            .with_context(|| format!("Failed to execute psql in container {}", self.container))?;

        if !output.status.success() {
            anyhow::bail!(
                "psql in container {} failed with status: {}\nStderr: {}",
                self.container,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl DatabaseEngine for DockerEngine {
    fn dump(&self, target: &DumpTarget, mode: &BackupMode, sink: &mut dyn Write) -> Result<()> {
        let mut cmd = self.exec_command(false);
        match target {
            DumpTarget::Database(name) => {
                if !is_valid_database_name(name) {
                    return Err(AppError::InvalidInput(format!(
                        "invalid database name: {:?}",
                        name
                    )));
                }
                cmd.arg("pg_dump");
            }
            DumpTarget::Cluster => {
                cmd.arg("pg_dumpall");
            }
        }
        cmd.arg("-U").arg(&self.user);

        match mode {
            BackupMode::Full => {}
            BackupMode::SchemaOnly => {
                cmd.arg("--schema-only");
            }
            BackupMode::TableSubset(tables) => {
                if *target == DumpTarget::Cluster {
                    return Err(AppError::InvalidInput(
                        "a table subset cannot be dumped from the whole cluster".to_string(),
                    ));
                }
                if tables.is_empty() {
                    return Err(AppError::InvalidInput(
                        "table subset backup requested with an empty table list".to_string(),
                    ));
                }
                for table in tables {
                    if !is_valid_table_name(table) {
                        return Err(AppError::InvalidInput(format!(
                            "invalid table name: {:?}",
                            table
                        )));
                    }
                    cmd.arg("-t").arg(table);
                }
            }
        }

        if let DumpTarget::Database(name) = target {
            cmd.arg(name);
        }

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("Failed to spawn dump command in container {}", self.container)
            })?;

        let mut stdout = child
            .stdout
            .take()
            .context("Dump child process has no stdout handle")?;
        let copy_result = io::copy(&mut stdout, sink);
        drop(stdout);

        let output = child
            .wait_with_output()
            .context("Failed to wait for dump command")?;

        // Report the tool failure first; a broken-pipe copy error is usually
        // just its consequence.
        if !output.status.success() {
            return Err(AppError::DumpFailed {
                database: target.label().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        copy_result.map_err(AppError::Io)?;
        Ok(())
    }

    fn replay(&self, database: &str, artifact_path: &Path) -> Result<()> {
        if !is_valid_database_name(database) {
            return Err(AppError::InvalidInput(format!(
                "invalid database name: {:?}",
                database
            )));
        }
        let artifact_file = File::open(artifact_path).with_context(|| {
            format!("Failed to open artifact for replay: {}", artifact_path.display())
        })?;

        let custom_format = artifact_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "backup");

        let mut cmd = self.exec_command(true);
        if custom_format {
            cmd.arg("pg_restore")
                .arg("--no-owner")
                .arg("--exit-on-error")
                .arg("-U")
                .arg(&self.user)
                .arg("-d")
                .arg(database);
        } else {
            cmd.arg("psql")
                .arg("-X")
                .arg("-q")
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("-U")
                .arg(&self.user)
                .arg("-d")
                .arg(database);
        }

        let child = cmd
            .stdin(Stdio::from(artifact_file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to spawn replay command in container {}",
                    self.container
                )
            })?;

        let output = child
            .wait_with_output()
            .context("Failed to wait for replay command")?;

        if !output.status.success() {
            return Err(AppError::RestoreFailed {
                database: database.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<String>> {
        let stdout = self.run_sql(
            "postgres",
            "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn = true;",
        )?;
        let db_names: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(db_names)
    }

    fn database_exists(&self, database: &str) -> Result<bool> {
        if !is_valid_database_name(database) {
            return Err(AppError::InvalidInput(format!(
                "invalid database name: {:?}",
                database
            )));
        }
        let stdout = self.run_sql(
            "postgres",
            &format!(
                "SELECT 1 FROM pg_database WHERE datname = '{}';",
                database
            ),
        )?;
        Ok(!stdout.trim().is_empty())
    }

    fn create_database(&self, database: &str) -> Result<()> {
        if !is_valid_database_name(database) {
            return Err(AppError::InvalidInput(format!(
                "invalid database name: {:?}",
                database
            )));
        }
        let create_sql = format!(
            r#"CREATE DATABASE "{}" OWNER "{}""#,
            database.replace('"', "\"\""),
            self.user.replace('"', "\"\"")
        );
        self.run_sql("postgres", &create_sql)
            .with_context(|| format!("Failed to create database '{}'", database))?;
        println!("✓ Database '{}' created.", database);
        Ok(())
    }

    fn terminate_sessions(&self, database: &str) -> Result<()> {
        if !is_valid_database_name(database) {
            return Err(AppError::InvalidInput(format!(
                "invalid database name: {:?}",
                database
            )));
        }
        self.run_sql(
            "postgres",
            &format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = '{}' AND pid <> pg_backend_pid();",
                database
            ),
        )
        .with_context(|| {
            format!(
                "Failed to terminate connections to database '{}'. This might require superuser privileges.",
                database
            )
        })?;
        Ok(())
    }
}
