//! Error types for Quillcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuillcastError>;

#[derive(Error, Debug)]
pub enum QuillcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Shutdown was requested while an operation was sleeping. This is the
    /// cancellation signal for the process lifecycle owner, not a posting
    /// failure.
    #[error("Operation cancelled by shutdown request")]
    Cancelled,
}

impl QuillcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QuillcastError::Cancelled => 0,
            QuillcastError::Config(_) => 2,
            QuillcastError::InvalidInput(_) => 3,
            QuillcastError::Database(_) => 1,
            QuillcastError::Publish(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from the remote publish call, classified so the backoff executor
/// can branch on kind rather than on error text.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The service signalled a temporary rate limit (429-equivalent).
    /// `retry_after` carries the server-provided reset hint in seconds,
    /// when one was present.
    #[error("Rate limited by remote service (retry hint: {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// Any non-transient failure: auth, validation, malformed request,
    /// network breakage. Never retried.
    #[error("Publish failed: {0}")]
    Fatal(String),

    /// The transient failure persisted through the whole retry budget.
    #[error("Rate limit not recovered after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        cause: Box<PublishError>,
    },
}

impl PublishError {
    /// Whether this failure warrants a retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::RateLimited { .. })
    }

    /// Server-provided reset hint, if any.
    pub fn retry_hint_secs(&self) -> Option<u64> {
        match self {
            PublishError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
