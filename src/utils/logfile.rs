// pgbackuptool/src/utils/logfile.rs
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Appends timestamped status lines to the backup log file. The log is an
/// operator-facing record; failing to write it must never fail the run, so
/// errors degrade to a console warning.
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(path: PathBuf) -> Self {
        StatusLog { path }
    }

    pub fn append(&self, message: &str) {
        let line = format!(
            "{} - {}\n",
            Local::now().format("%d/%m/%Y %H:%M:%S"),
            message
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            eprintln!("⚠️ Could not write to log file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_append_creates_and_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = StatusLog::new(dir.path().join("backup.log"));

        log.append("Backup of shop started");
        log.append("Backup of shop finished");

        let content = fs::read_to_string(dir.path().join("backup.log")).expect("log file");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Backup of shop started"));
        assert!(lines[1].ends_with("Backup of shop finished"));
        // Each line leads with the DD/MM/YYYY HH:MM:SS stamp.
        assert_eq!(lines[0].as_bytes()[2], b'/');
        assert_eq!(lines[0].as_bytes()[5], b'/');
    }
}
