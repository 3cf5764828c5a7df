// pgbackuptool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_RETENTION_DAYS: i64 = 30;
const DEFAULT_LOG_FILE_NAME: &str = "backup.log";

// Struct for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub container_name: Option<String>,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<i64>,
    pub webhook_url: Option<String>,
    pub database_list: Option<serde_json::Value>,
    pub log_file: Option<PathBuf>,
}

// Application's internal configuration struct
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Optional name (or name fragment) used to narrow container discovery,
    /// and accepted as an explicit selection when several candidates match.
    pub container_name: Option<String>,
    pub postgres_user: String,
    pub postgres_password: Option<String>,
    pub backup_dir: PathBuf,
    pub retention_days: i64,
    pub webhook_url: Option<Url>,
    /// Databases to back up. `None` means every non-template database on the
    /// server; the literal name "ALL" requests a whole-cluster dump.
    pub database_list: Option<Vec<String>>,
    pub log_file: PathBuf,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        check_config_permissions(config_path);

        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        AppConfig::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let postgres_user = raw
            .postgres_user
            .as_ref()
            .filter(|s| !s.trim().is_empty())
            .context("postgres_user must be set in config.json")?
            .clone();

        let backup_dir = raw
            .backup_dir
            .as_ref()
            .context("backup_dir must be set in config.json")?
            .clone();
        if backup_dir.to_string_lossy().is_empty() {
            anyhow::bail!("backup_dir cannot be empty in config.json.");
        }

        let retention_days = raw.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        if retention_days < 0 {
            anyhow::bail!("retention_days cannot be negative in config.json.");
        }

        let webhook_url = match raw.webhook_url.as_ref().filter(|s| !s.trim().is_empty()) {
            Some(s) => {
                let parsed = Url::parse(s)
                    .with_context(|| format!("webhook_url is not a valid URL: {}", s))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    anyhow::bail!("webhook_url must use http or https: {}", s);
                }
                Some(parsed)
            }
            None => None,
        };

        let log_file = raw
            .log_file
            .clone()
            .unwrap_or_else(|| backup_dir.join(DEFAULT_LOG_FILE_NAME));

        Ok(AppConfig {
            container_name: raw.container_name.clone().filter(|s| !s.trim().is_empty()),
            postgres_user,
            postgres_password: raw.postgres_password.clone().filter(|s| !s.is_empty()),
            backup_dir,
            retention_days,
            webhook_url,
            database_list: parse_database_list(&raw.database_list)?,
            log_file,
        })
    }
}

/// Parses the database_list configuration value.
/// Returns a vector of database names, or None when the whole server should
/// be enumerated at backup time.
fn parse_database_list(database_list: &Option<serde_json::Value>) -> Result<Option<Vec<String>>> {
    match database_list {
        Some(value) => {
            let databases: Vec<String> = serde_json::from_value(value.clone())
                .context("database_list must be an array of database names")?;
            for db in &databases {
                if !crate::engine::is_valid_database_name(db) {
                    anyhow::bail!(
                        "Invalid character in database name list from config: {:?}",
                        db
                    );
                }
            }
            if databases.is_empty() {
                return Ok(None);
            }
            Ok(Some(databases))
        }
        None => Ok(None),
    }
}

/// Warns when the config file is readable by anyone other than its owner.
/// Credentials live in this file, so it should be chmod 600.
#[cfg(unix)]
fn check_config_permissions(config_path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(config_path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            println!(
                "⚠️ Config file {} is readable by group/others (mode {:o}). Consider chmod 600.",
                config_path.display(),
                mode & 0o777
            );
        }
    }
}

#[cfg(not(unix))]
fn check_config_permissions(_config_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_from(value: serde_json::Value) -> RawJsonConfig {
        serde_json::from_value(value).expect("raw config should deserialize")
    }

    #[test]
    fn test_full_config_round_trip() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(json!({
            "container_name": "pg-main",
            "postgres_user": "postgres",
            "postgres_password": "secret",
            "backup_dir": "/var/backups/pg",
            "retention_days": 14,
            "webhook_url": "https://hooks.example.com/backup",
            "database_list": ["shop", "analytics"],
            "log_file": "/var/log/pgbackup.log"
        })))?;

        assert_eq!(config.container_name.as_deref(), Some("pg-main"));
        assert_eq!(config.postgres_user, "postgres");
        assert_eq!(config.postgres_password.as_deref(), Some("secret"));
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/pg"));
        assert_eq!(config.retention_days, 14);
        assert_eq!(
            config.webhook_url.as_ref().map(|u| u.as_str()),
            Some("https://hooks.example.com/backup")
        );
        assert_eq!(
            config.database_list,
            Some(vec!["shop".to_string(), "analytics".to_string()])
        );
        assert_eq!(config.log_file, PathBuf::from("/var/log/pgbackup.log"));
        Ok(())
    }

    #[test]
    fn test_minimal_config_applies_defaults() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(raw_from(json!({
            "postgres_user": "postgres",
            "backup_dir": "./backups"
        })))?;

        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert!(config.webhook_url.is_none());
        assert!(config.database_list.is_none());
        assert_eq!(config.log_file, PathBuf::from("./backups/backup.log"));
        Ok(())
    }

    #[test]
    fn test_missing_backup_dir_is_an_error() {
        let result = AppConfig::from_raw(raw_from(json!({
            "postgres_user": "postgres"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_user_is_an_error() {
        let result = AppConfig::from_raw(raw_from(json!({
            "backup_dir": "./backups"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_webhook_url_is_an_error() {
        let result = AppConfig::from_raw(raw_from(json!({
            "postgres_user": "postgres",
            "backup_dir": "./backups",
            "webhook_url": "not a url"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_database_list_rejects_bad_names() {
        let result = parse_database_list(&Some(json!(["shop", "bad;name"])));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_database_list_means_all() -> anyhow::Result<()> {
        let result = parse_database_list(&Some(json!([])))?;
        assert_eq!(result, None);
        Ok(())
    }

    #[test]
    fn test_negative_retention_is_an_error() {
        let result = AppConfig::from_raw(raw_from(json!({
            "postgres_user": "postgres",
            "backup_dir": "./backups",
            "retention_days": -1
        })));
        assert!(result.is_err());
    }
}
