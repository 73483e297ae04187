//! One-shot reminders and todo items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A one-shot reminder.
///
/// Todo items share the table: they carry a due date in `fire_at` but are
/// never picked up by the delivery sweep.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Reminder {
    /// Surrogate key, assigned on insert
    pub id: i64,

    /// Chat the notification is delivered to
    pub chat_id: i64,

    /// Owner; scopes every mutation
    pub user_id: i64,

    /// When to fire (UTC)
    pub fire_at: DateTime<Utc>,

    pub label: String,

    /// Set once the reminder has been delivered; the row is frozen afterwards
    pub notified: bool,

    pub is_todo: bool,
}

/// Fields needed to insert a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReminder {
    pub chat_id: i64,
    pub user_id: i64,
    pub fire_at: DateTime<Utc>,
    pub label: String,
    pub is_todo: bool,
}
