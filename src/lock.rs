// pgbackuptool/src/lock.rs
use anyhow::Context;
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::AppError;

const LOCK_FILE_NAME: &str = ".backup.lock";
const LEASE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// A lease older than this is considered abandoned and taken over.
pub const LEASE_TTL_HOURS: i64 = 6;

#[derive(Debug, Serialize, Deserialize)]
struct Lease {
    pid: u32,
    acquired_at: String,
}

/// Advisory lease on the backup directory. Held for the duration of a
/// backup/restore/prune cycle so two runs cannot interleave their retention
/// bookkeeping. Cooperative only: enforced by convention, not by the OS.
pub struct DirectoryLock {
    path: PathBuf,
}

impl DirectoryLock {
    pub fn acquire(dir: &Path) -> std::result::Result<Self, AppError> {
        let path = dir.join(LOCK_FILE_NAME);
        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = Self::read_lease(&path);
                if Self::lease_is_stale(holder.as_ref()) {
                    println!(
                        "⚠️ Taking over stale backup lock at {} (held by pid {})",
                        path.display(),
                        holder.as_ref().map(|l| l.pid).unwrap_or_default()
                    );
                    fs::remove_file(&path).map_err(AppError::Io)?;
                    Self::try_create(&path).map_err(AppError::Io)
                } else {
                    let description = match holder {
                        Some(lease) => {
                            format!("pid {} since {}", lease.pid, lease.acquired_at)
                        }
                        None => "unknown holder".to_string(),
                    };
                    Err(AppError::Locked(description))
                }
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<DirectoryLock> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let lease = Lease {
            pid: std::process::id(),
            acquired_at: Local::now().format(LEASE_TIMESTAMP_FORMAT).to_string(),
        };
        let body = serde_json::to_string(&lease)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.write_all(body.as_bytes())?;
        Ok(DirectoryLock {
            path: path.to_path_buf(),
        })
    }

    fn read_lease(path: &Path) -> Option<Lease> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// A missing or unparsable lease is treated as stale: a crashed writer
    /// can leave a torn file behind, and waiting on it forever helps nobody.
    fn lease_is_stale(lease: Option<&Lease>) -> bool {
        let Some(lease) = lease else {
            return true;
        };
        let Ok(acquired_at) =
            NaiveDateTime::parse_from_str(&lease.acquired_at, LEASE_TIMESTAMP_FORMAT)
        else {
            return true;
        };
        Local::now().naive_local() - acquired_at > Duration::hours(LEASE_TTL_HOURS)
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove lock file {}", self.path.display()))
        {
            eprintln!("⚠️ {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_lease_is_held() {
        let dir = tempfile::tempdir().expect("tempdir");

        let lock = DirectoryLock::acquire(dir.path()).expect("first acquire");
        let second = DirectoryLock::acquire(dir.path());
        assert!(matches!(second, Err(AppError::Locked(_))));

        drop(lock);
        DirectoryLock::acquire(dir.path()).expect("re-acquire after release");
    }

    #[test]
    fn test_stale_lease_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(LOCK_FILE_NAME);

        let stale_time = Local::now().naive_local() - Duration::hours(LEASE_TTL_HOURS + 1);
        let lease = Lease {
            pid: 1,
            acquired_at: stale_time.format(LEASE_TIMESTAMP_FORMAT).to_string(),
        };
        fs::write(&path, serde_json::to_string(&lease).unwrap()).expect("write stale lease");

        DirectoryLock::acquire(dir.path()).expect("stale lease should be taken over");
    }

    #[test]
    fn test_corrupt_lease_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(LOCK_FILE_NAME), b"not json").expect("write corrupt lease");

        DirectoryLock::acquire(dir.path()).expect("corrupt lease should be taken over");
    }

    #[test]
    fn test_drop_removes_the_lease_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(LOCK_FILE_NAME);

        let lock = DirectoryLock::acquire(dir.path()).expect("acquire");
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }
}
