//! Per-user preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Zone used when a user has never chosen one.
pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

/// Stored preferences for a user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: i64,

    /// IANA zone name
    pub timezone: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
