use thiserror::Error;
use tokio_rusqlite::rusqlite;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("storage backend has not been initialized")]
    NotInitialized,

    #[error("unknown storage backend type: {0}")]
    UnknownBackend(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    /// Whether the error reflects a configuration mistake rather than a runtime fault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, DbError::UnknownBackend(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
