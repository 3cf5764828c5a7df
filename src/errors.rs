use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No running PostgreSQL container found")]
    TargetNotFound,

    #[error("More than one PostgreSQL container is running ({candidates:?}); an explicit selection is required")]
    AmbiguousTarget { candidates: Vec<String> },

    #[error("Dump of database '{database}' failed: {stderr}")]
    DumpFailed { database: String, stderr: String },

    #[error("Restore of database '{database}' failed: {stderr}")]
    RestoreFailed { database: String, stderr: String },

    #[error("Restore not confirmed for database '{0}'; aborting without changes")]
    NotConfirmed(String),

    #[error("Backup index {index} is out of range (valid: 1..={len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient disk space: {available} bytes available, {required} bytes required")]
    DiskPressure { available: u64, required: u64 },

    #[error("Backup directory is locked by another run: {0}")]
    Locked(String),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
