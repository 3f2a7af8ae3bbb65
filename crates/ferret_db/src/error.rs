//! Error types for the database layer.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// A transaction is already open on this handle.
    #[error("A transaction is already in progress")]
    TransactionInProgress,

    /// Commit, rollback or a savepoint was requested without an open transaction.
    #[error("There is no transaction in progress")]
    NoTransactionInProgress,

    /// An update was requested that would not change anything.
    #[error("Update does not change anything")]
    EmptyUpdate,

    /// An argument was rejected before reaching SQLite.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The named savepoint does not exist in the running transaction.
    #[error("Savepoint does not exist: {0}")]
    InvalidSavepoint(String),

    /// Constraint violation (unique, foreign key, etc.)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The connection pool has been closed.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// SQLite error (prepare, step, etc.)
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Returns true for unique/foreign key violations.
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Constraint(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            other => Self::Sqlite(other),
        }
    }
}
