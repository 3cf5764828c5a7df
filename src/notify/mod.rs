// pgbackuptool/src/notify/mod.rs
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::backup::{BackupJobResult, JobStatus};
use crate::restore::RestoreJobResult;
use crate::retention::RetentionReport;

pub const DEAD_LETTER_FILE: &str = "webhook-dead-letter.log";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const PAYLOAD_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedBackup {
    pub backup_name: String,
    pub deletion_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERRO")]
    Erro,
}

/// The webhook envelope. One report is sent per database per run; restore
/// runs reuse the same shape with the source artifact in `backup_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookReport {
    pub action: String,
    pub date: String,
    pub database_name: String,
    pub backup_file: String,
    pub backup_size: String,
    pub retention_days: i64,
    pub deleted_backup: Vec<DeletedBackup>,
    pub status: ReportStatus,
    pub notes: String,
}

impl WebhookReport {
    pub fn for_backup(
        result: &BackupJobResult,
        retention_days: i64,
        retention: &RetentionReport,
    ) -> Self {
        WebhookReport {
            action: "database backup".to_string(),
            date: format_payload_date(result.timestamp),
            database_name: result.database.clone(),
            backup_file: result
                .artifact
                .as_ref()
                .map(|a| a.file_name())
                .unwrap_or_default(),
            backup_size: result
                .artifact
                .as_ref()
                .map(|a| human_size(a.size_bytes))
                .unwrap_or_default(),
            retention_days,
            deleted_backup: deleted_entries(retention),
            status: status_of(result.status),
            notes: notes_from(result.error_detail.as_deref(), retention),
        }
    }

    pub fn for_restore(result: &RestoreJobResult, retention_days: i64) -> Self {
        WebhookReport {
            action: "database restore".to_string(),
            date: format_payload_date(result.timestamp),
            database_name: result.database.clone(),
            backup_file: result.artifact_name.clone(),
            backup_size: String::new(),
            retention_days,
            deleted_backup: Vec::new(),
            status: status_of(result.status),
            notes: notes_from(result.error_detail.as_deref(), &RetentionReport::default()),
        }
    }

    pub fn for_prune(
        database_label: &str,
        timestamp: NaiveDateTime,
        retention_days: i64,
        retention: &RetentionReport,
    ) -> Self {
        WebhookReport {
            action: "retention prune".to_string(),
            date: format_payload_date(timestamp),
            database_name: database_label.to_string(),
            backup_file: String::new(),
            backup_size: String::new(),
            retention_days,
            deleted_backup: deleted_entries(retention),
            status: ReportStatus::Ok,
            notes: notes_from(None, retention),
        }
    }
}

fn status_of(status: JobStatus) -> ReportStatus {
    match status {
        JobStatus::Success => ReportStatus::Ok,
        JobStatus::Failure => ReportStatus::Erro,
    }
}

fn format_payload_date(timestamp: NaiveDateTime) -> String {
    timestamp.format(PAYLOAD_DATE_FORMAT).to_string()
}

fn deleted_entries(retention: &RetentionReport) -> Vec<DeletedBackup> {
    retention
        .deleted
        .iter()
        .map(|(backup_name, deletion_reason)| DeletedBackup {
            backup_name: backup_name.clone(),
            deletion_reason: deletion_reason.clone(),
        })
        .collect()
}

fn notes_from(error_detail: Option<&str>, retention: &RetentionReport) -> String {
    let mut parts = Vec::new();
    if let Some(detail) = error_detail {
        parts.push(detail.to_string());
    }
    if !retention.failed.is_empty() {
        parts.push(format!(
            "{} expired backup(s) could not be deleted",
            retention.failed.len()
        ));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join("; ")
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Sends status reports to the configured webhook. Delivery is best-effort:
/// bounded retries, then the payload goes to a dead-letter file and the
/// caller gets `false`. Notification failure never fails the run itself.
pub struct Notifier {
    client: reqwest::Client,
    endpoint: Option<Url>,
    dead_letter_path: PathBuf,
    backoff: Duration,
}

impl Notifier {
    pub fn new(endpoint: Option<Url>, dead_letter_path: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for webhook notifications")?;
        Ok(Notifier {
            client,
            endpoint,
            dead_letter_path,
            backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn notify(&self, report: &WebhookReport) -> bool {
        let Some(endpoint) = &self.endpoint else {
            return true;
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .post(endpoint.clone())
                .json(report)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    println!("✓ Webhook notified for {}", report.database_name);
                    return true;
                }
                Ok(response) => {
                    eprintln!(
                        "⚠️ Webhook attempt {}/{} returned status {}",
                        attempt,
                        MAX_ATTEMPTS,
                        response.status()
                    );
                }
                Err(e) => {
                    eprintln!(
                        "⚠️ Webhook attempt {}/{} failed: {}",
                        attempt, MAX_ATTEMPTS, e
                    );
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.backoff).await;
            }
        }

        self.write_dead_letter(report);
        false
    }

    fn write_dead_letter(&self, report: &WebhookReport) {
        let append = || -> std::io::Result<()> {
            let line = serde_json::to_string(report)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.dead_letter_path)?;
            writeln!(file, "{}", line)
        };
        match append() {
            Ok(()) => eprintln!(
                "⚠️ Webhook delivery failed; payload recorded in {}",
                self.dead_letter_path.display()
            ),
            Err(e) => eprintln!(
                "⚠️ Webhook delivery failed and the payload could not be recorded in {}: {}",
                self.dead_letter_path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RETENTION_REASON;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn sample_report(status: ReportStatus) -> WebhookReport {
        WebhookReport {
            action: "database backup".to_string(),
            date: "07/08/2025 12:00:00".to_string(),
            database_name: "shop".to_string(),
            backup_file: "backup_2025-08-07_12_00_00_shop.sql.gz".to_string(),
            backup_size: "1.2 MiB".to_string(),
            retention_days: 30,
            deleted_backup: vec![DeletedBackup {
                backup_name: "backup_2025-06-01_12_00_00_shop.sql.gz".to_string(),
                deletion_reason: RETENTION_REASON.to_string(),
            }],
            status,
            notes: "-".to_string(),
        }
    }

    async fn stub_server(status_line: &'static str, hits: Arc<AtomicUsize>) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub server");
        let addr = listener.local_addr().expect("stub server addr");
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Url::parse(&format!("http://{}/hook", addr)).expect("stub url")
    }

    #[test]
    fn test_payload_serialization_matches_the_wire_shape() {
        let report = sample_report(ReportStatus::Erro);
        let value = serde_json::to_value(&report).expect("serialize");

        assert_eq!(value["status"], "ERRO");
        assert_eq!(value["database_name"], "shop");
        assert_eq!(value["deleted_backup"][0]["deletion_reason"], "retention expired");
        assert_eq!(value["retention_days"], 30);
    }

    #[test]
    fn test_human_size_formatting() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[tokio::test]
    async fn test_notify_without_endpoint_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notifier = Notifier::new(None, dir.path().join(DEAD_LETTER_FILE)).expect("notifier");

        assert!(notifier.notify(&sample_report(ReportStatus::Ok)).await);
        assert!(!dir.path().join(DEAD_LETTER_FILE).exists());
    }

    #[tokio::test]
    async fn test_notify_succeeds_on_2xx() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hits = Arc::new(AtomicUsize::new(0));
        let endpoint = stub_server("200 OK", hits.clone()).await;

        let notifier = Notifier::new(Some(endpoint), dir.path().join(DEAD_LETTER_FILE))
            .expect("notifier")
            .with_backoff(Duration::ZERO);

        assert!(notifier.notify(&sample_report(ReportStatus::Ok)).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join(DEAD_LETTER_FILE).exists());
    }

    #[tokio::test]
    async fn test_notify_retries_three_times_then_dead_letters_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hits = Arc::new(AtomicUsize::new(0));
        let endpoint = stub_server("500 Internal Server Error", hits.clone()).await;

        let notifier = Notifier::new(Some(endpoint), dir.path().join(DEAD_LETTER_FILE))
            .expect("notifier")
            .with_backoff(Duration::ZERO);

        let report = sample_report(ReportStatus::Erro);
        assert!(!notifier.notify(&report).await);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let dead_letter = fs::read_to_string(dir.path().join(DEAD_LETTER_FILE)).expect("dead letter");
        let lines: Vec<&str> = dead_letter.lines().collect();
        assert_eq!(lines.len(), 1);
        let recorded: WebhookReport = serde_json::from_str(lines[0]).expect("valid JSON line");
        assert_eq!(recorded, report);
    }
}
