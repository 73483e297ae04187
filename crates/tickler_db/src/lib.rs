//! Tickler Database Layer
//!
//! SQLite storage for one-shot reminders, recurring reminder definitions and
//! per-user preferences.
//!
//! # Architecture
//!
//! - **Single writer** - every mutation runs inside a [`WriteTx`], which holds
//!   a database-wide lock, so "select due then mark" and owner edits never
//!   interleave
//! - **Owner-scoped mutations** - updates and deletes match on `user_id` and
//!   report `false` instead of erroring when nothing matched
//! - **Additive migrations** - new columns default to values that keep old
//!   rows meaning what they meant
//!
//! # Usage
//!
//! ```rust,ignore
//! use tickler_db::{TicklerDb, queries};
//!
//! let db = TicklerDb::open("reminders.db").await?;
//! let pending = queries::list_active_reminders(db.pool(), user_id).await?;
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod queries;

pub use connection::{DbStats, TicklerDb, WriteTx};
pub use error::{DbError, DbResult};

pub use models::{
    Cadence, DEFAULT_TIMEZONE, NewRecurringReminder, NewReminder, RecurringChanges,
    RecurringReminder, RecurringType, Reminder, TriggerCandidate, UserPreferences,
};
