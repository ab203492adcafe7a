//! Error types for storage operations

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    QueryFailed(String),
    MigrationFailed(String),

    /// Collector, execution or instance row is absent
    NotFound(String),

    /// Write against an execution that is already finalized, or a rule
    /// name collision inside one collector
    Conflict(String),

    /// A text column holds a value none of the model enums accept
    InvalidColumn { column: String, reason: String },

    /// Detail payloads and last-run summaries are JSON text
    SerializationError(String),

    IoError(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "cannot open score store: {msg}"),
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {msg}"),
            StorageError::MigrationFailed(msg) => write!(f, "schema migration failed: {msg}"),
            StorageError::NotFound(what) => write!(f, "{what} not found"),
            StorageError::Conflict(msg) => write!(f, "conflicting write: {msg}"),
            StorageError::InvalidColumn { column, reason } => {
                write!(f, "invalid value in column {column}: {reason}")
            }
            StorageError::SerializationError(msg) => write!(f, "payload encoding error: {msg}"),
            StorageError::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::NotFound("row".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
