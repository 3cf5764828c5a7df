// pgbackuptool/src/catalog/mod.rs
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::errors::AppError;

pub const ARTIFACT_PREFIX: &str = "backup";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";
/// Logical database name carried by whole-cluster dumps.
pub const CLUSTER_SCOPE: &str = "ALL";
/// Suffix of artifacts still being written. Such files never decode, so the
/// catalog cannot observe a half-written backup.
pub const PARTIAL_SUFFIX: &str = ".part";

/// A single backup file on durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub database: String,
    pub created_at: NaiveDateTime,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub compressed: bool,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

fn artifact_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^backup_(\d{4}-\d{2}-\d{2}_\d{2}_\d{2}_\d{2})(?:_([A-Za-z0-9][A-Za-z0-9_-]*))?\.(sql|backup)(\.gz)?$",
        )
        .expect("artifact name pattern is valid")
    })
}

/// Formats the artifact filename for a dump of `database` taken at
/// `created_at`. The executor always publishes gzipped SQL dumps; cluster
/// dumps omit the database segment.
pub fn encode_artifact_name(database: &str, created_at: NaiveDateTime) -> String {
    let timestamp = created_at.format(TIMESTAMP_FORMAT);
    if database == CLUSTER_SCOPE {
        format!("{}_{}.sql.gz", ARTIFACT_PREFIX, timestamp)
    } else {
        format!("{}_{}_{}.sql.gz", ARTIFACT_PREFIX, timestamp, database)
    }
}

/// Parses `(database, created_at, compressed)` back out of an artifact
/// filename. Returns `None` for anything that is not a catalog entry,
/// including `.part` sentinels.
pub fn decode_artifact_name(name: &str) -> Option<(String, NaiveDateTime, bool)> {
    let captures = artifact_name_regex().captures(name)?;
    let created_at =
        NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), TIMESTAMP_FORMAT).ok()?;
    let database = captures
        .get(2)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| CLUSTER_SCOPE.to_string());
    let compressed = captures.get(4).is_some();
    Some((database, created_at, compressed))
}

/// Read-only view over the backup directory.
pub struct BackupCatalog {
    dir: PathBuf,
}

impl BackupCatalog {
    pub fn new(dir: PathBuf) -> Self {
        BackupCatalog { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists artifacts, newest first, optionally filtered to one database.
    /// Entries whose names do not match the artifact pattern are skipped,
    /// not errors. Ties on the timestamp are broken by filename lexical
    /// order so the listing is deterministic.
    pub fn list(&self, database: Option<&str>) -> Result<Vec<BackupArtifact>> {
        let entries = fs::read_dir(&self.dir).with_context(|| {
            format!("Failed to read backup directory: {}", self.dir.display())
        })?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to read entry in backup directory: {}", self.dir.display())
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((artifact_db, created_at, compressed)) = decode_artifact_name(name) else {
                continue;
            };
            if let Some(filter) = database {
                if artifact_db != filter {
                    continue;
                }
            }
            let size_bytes = entry
                .metadata()
                .with_context(|| format!("Failed to stat artifact: {}", path.display()))?
                .len();
            artifacts.push(BackupArtifact {
                database: artifact_db,
                created_at,
                path,
                size_bytes,
                compressed,
            });
        }

        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.file_name().cmp(&b.file_name()))
        });
        Ok(artifacts)
    }

    /// Picks an artifact from a listing by 1-based index, as shown to the
    /// operator.
    pub fn select_by_index(
        list: &[BackupArtifact],
        index: usize,
    ) -> std::result::Result<&BackupArtifact, AppError> {
        if index == 0 || index > list.len() {
            return Err(AppError::OutOfRange {
                index,
                len: list.len(),
            });
        }
        Ok(&list[index - 1])
    }
}
