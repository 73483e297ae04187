//! Error types for the storage layer.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Database error types.
#[derive(Debug, Error, Diagnostic)]
pub enum DbError {
    /// SQLite/sqlx error
    #[error("Database error: {0}")]
    #[diagnostic(code(tickler_db::sqlx))]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(
        code(tickler_db::migration),
        help("The database file may have been written by a newer build")
    )]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Entity not found
    #[error("{entity_type} not found: {id}")]
    #[diagnostic(code(tickler_db::not_found))]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// A stored row could not be turned back into a model
    #[error("Invalid data: {message}")]
    #[diagnostic(code(tickler_db::invalid_data))]
    InvalidData { message: String },

    /// Timezone name not present in the IANA database
    #[error("Unknown timezone: {name}")]
    #[diagnostic(
        code(tickler_db::invalid_timezone),
        help("Use an IANA zone name such as Europe/Moscow or America/New_York")
    )]
    InvalidTimezone { name: String },

    /// IO error (creating the database directory)
    #[error("IO error: {0}")]
    #[diagnostic(code(tickler_db::io))]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an invalid timezone error.
    pub fn invalid_timezone(name: impl Into<String>) -> Self {
        Self::InvalidTimezone { name: name.into() }
    }
}
