use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickler_db::DbError;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Why a single operation from the parser was rejected.
///
/// Reported back to the user for that operation only; the rest of the batch
/// still runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown action")]
    UnknownAction,

    #[error("cannot read date and time {0:?}, expected YYYY-MM-DD HH:MM:SS")]
    BadDateTime(String),

    #[error("cannot read date {0:?}, expected YYYY-MM-DD")]
    BadDate(String),

    #[error("cannot read time {0:?}, expected HH:MM")]
    BadTime(String),

    #[error("unknown recurrence type {0:?}")]
    BadRecurringType(String),

    #[error("cannot resolve day of week {0:?}")]
    BadDayOfWeek(String),

    #[error("day of month must be between 1 and 31, got {0:?}")]
    BadDayOfMonth(String),

    #[error("cannot read reminder id {0:?}")]
    BadReminderId(String),

    #[error("nothing to change")]
    NothingToChange,

    #[error("end date {end} is before start date {start}")]
    InvertedRange { start: String, end: String },

    #[error("{0} does not exist in the local timezone")]
    NonexistentLocalTime(String),
}

/// Core error type
#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Storage operation failed")]
    #[diagnostic(code(tickler_core::database))]
    Database(#[from] DbError),

    #[error("Invalid operation: {0}")]
    #[diagnostic(code(tickler_core::validation))]
    Validation(#[from] ValidationError),

    #[error("Upstream service {service} failed: {message}")]
    #[diagnostic(
        code(tickler_core::upstream),
        help("The request was not applied; nothing was written")
    )]
    Upstream { service: String, message: String },

    #[error("Delivery to chat {chat_id} failed: {message}")]
    #[diagnostic(code(tickler_core::notify))]
    Notify { chat_id: i64, message: String },

    #[error("Configuration error in {config_path}: {field}")]
    #[diagnostic(
        code(tickler_core::configuration_error),
        help("Check configuration at {config_path}\nExpected: {expected}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn notify(chat_id: i64, message: impl ToString) -> Self {
        Self::Notify {
            chat_id,
            message: message.to_string(),
        }
    }

    pub fn invalid_config(
        config_path: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let field = field.into();
        Self::ConfigurationError {
            config_path: config_path.into(),
            cause: ConfigError::InvalidValue {
                field: field.clone(),
                message: message.into(),
            },
            field,
            expected: expected.into(),
        }
    }
}
