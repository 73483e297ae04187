//! Database models.
//!
//! These structs map to the three tables: one-shot reminders, recurring
//! definitions and per-user preferences.

mod preferences;
mod recurring;
mod reminder;

use chrono::{DateTime, SubsecRound, Utc};

pub use preferences::{DEFAULT_TIMEZONE, UserPreferences};
pub use recurring::{
    Cadence, NewRecurringReminder, RecurringChanges, RecurringReminder, RecurringType,
    TriggerCandidate, weekday_from_index, weekday_index,
};
pub(crate) use recurring::{RecurringReminderRow, TriggerCandidateRow, format_time};
pub use reminder::{NewReminder, Reminder};

/// Drop sub-second precision before an instant is written.
///
/// Every stored instant has the same textual shape, so SQL comparisons on
/// the text column order chronologically.
pub fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}
