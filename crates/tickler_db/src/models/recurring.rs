//! Recurring reminder definitions.
//!
//! A definition describes a pattern (daily, weekly on a weekday, monthly on
//! a day of the month) plus a wall-clock time. Concrete occurrences are
//! never stored; they are derived when listing and when checking what is due.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::DbError;

/// Recurrence kind as stored in the `recurring_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecurringType {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for RecurringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for RecurringType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(DbError::invalid_data(format!(
                "unknown recurring type: {other}"
            ))),
        }
    }
}

/// Weekday index as stored: 0 = Sunday through 6 = Saturday.
pub fn weekday_index(day: Weekday) -> i64 {
    i64::from(day.num_days_from_sunday())
}

/// Inverse of [`weekday_index`].
pub fn weekday_from_index(index: i64) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// Which calendar days a definition lands on.
///
/// Only the day field relevant to the kind exists, so a weekly definition
/// can never carry a day of month and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly { day_of_week: Weekday },
    /// Day 1-31. Months without that day are skipped, never rolled over.
    Monthly { day_of_month: u32 },
}

impl Cadence {
    pub fn kind(&self) -> RecurringType {
        match self {
            Self::Daily => RecurringType::Daily,
            Self::Weekly { .. } => RecurringType::Weekly,
            Self::Monthly { .. } => RecurringType::Monthly,
        }
    }

    /// Stored weekday column (0 = Sunday), `None` unless weekly.
    pub fn day_of_week(&self) -> Option<i64> {
        match self {
            Self::Weekly { day_of_week } => Some(weekday_index(*day_of_week)),
            _ => None,
        }
    }

    /// Stored day-of-month column, `None` unless monthly.
    pub fn day_of_month(&self) -> Option<i64> {
        match self {
            Self::Monthly { day_of_month } => Some(i64::from(*day_of_month)),
            _ => None,
        }
    }

    /// Rebuild a cadence from its column values.
    ///
    /// Day columns that do not apply to `kind` are ignored.
    pub fn from_columns(
        kind: RecurringType,
        day_of_week: Option<i64>,
        day_of_month: Option<i64>,
    ) -> Result<Self, DbError> {
        match kind {
            RecurringType::Daily => Ok(Self::Daily),
            RecurringType::Weekly => day_of_week
                .and_then(weekday_from_index)
                .map(|day_of_week| Self::Weekly { day_of_week })
                .ok_or_else(|| {
                    DbError::invalid_data(format!(
                        "weekly definition with day_of_week {day_of_week:?}"
                    ))
                }),
            RecurringType::Monthly => day_of_month
                .filter(|day| (1..=31).contains(day))
                .map(|day| Self::Monthly {
                    day_of_month: day as u32,
                })
                .ok_or_else(|| {
                    DbError::invalid_data(format!(
                        "monthly definition with day_of_month {day_of_month:?}"
                    ))
                }),
        }
    }

    /// Whether the pattern lands on `date`.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly { day_of_week } => date.weekday() == *day_of_week,
            Self::Monthly { day_of_month } => date.day() == *day_of_month,
        }
    }
}

/// A recurring reminder definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringReminder {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub cadence: Cadence,

    /// Wall-clock time in the owner's timezone, minute precision
    pub time: NaiveTime,

    /// Last time this definition fired; at most once per local day
    pub last_triggered: Option<DateTime<Utc>>,

    /// False once deleted; inactive rows are kept but never shown or fired
    pub active: bool,

    pub is_todo: bool,
}

/// Fields needed to insert a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecurringReminder {
    pub chat_id: i64,
    pub user_id: i64,
    pub label: String,
    pub cadence: Cadence,
    pub time: NaiveTime,
    pub is_todo: bool,
}

/// Full replacement of the user-editable fields of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringChanges {
    pub label: String,
    pub cadence: Cadence,
    pub time: NaiveTime,
}

impl RecurringChanges {
    /// Start from the current values of `existing`.
    pub fn from_existing(existing: &RecurringReminder) -> Self {
        Self {
            label: existing.label.clone(),
            cadence: existing.cadence,
            time: existing.time,
        }
    }
}

/// A definition eligible for firing, with its owner's stored timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCandidate {
    pub reminder: RecurringReminder,

    /// `None` when the owner has no preferences row yet
    pub timezone: Option<String>,
}

/// Raw row shape of `recurring_reminders`.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct RecurringReminderRow {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub recurring_type: RecurringType,
    pub time: String,
    pub day_of_week: Option<i64>,
    pub day_of_month: Option<i64>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub active: bool,
    pub is_todo: bool,
}

impl TryFrom<RecurringReminderRow> for RecurringReminder {
    type Error = DbError;

    fn try_from(row: RecurringReminderRow) -> Result<Self, Self::Error> {
        let cadence = Cadence::from_columns(row.recurring_type, row.day_of_week, row.day_of_month)?;
        let time = NaiveTime::parse_from_str(&row.time, "%H:%M").map_err(|e| {
            DbError::invalid_data(format!(
                "recurring reminder {} has bad time {:?}: {e}",
                row.id, row.time
            ))
        })?;

        Ok(Self {
            id: row.id,
            chat_id: row.chat_id,
            user_id: row.user_id,
            label: row.label,
            created_at: row.created_at,
            cadence,
            time,
            last_triggered: row.last_triggered,
            active: row.active,
            is_todo: row.is_todo,
        })
    }
}

/// Row shape for the trigger-candidate join.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TriggerCandidateRow {
    #[sqlx(flatten)]
    pub reminder: RecurringReminderRow,
    pub timezone: Option<String>,
}

impl TryFrom<TriggerCandidateRow> for TriggerCandidate {
    type Error = DbError;

    fn try_from(row: TriggerCandidateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            reminder: row.reminder.try_into()?,
            timezone: row.timezone,
        })
    }
}

/// Format a time of day the way it is stored.
pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekly_matches_only_its_weekday() {
        let monday = Cadence::Weekly {
            day_of_week: Weekday::Mon,
        };
        // 2024-03-11 is a Monday
        assert!(monday.matches(date(2024, 3, 11)));
        assert!(!monday.matches(date(2024, 3, 12)));
    }

    #[test]
    fn monthly_31st_skips_short_months() {
        let last = Cadence::Monthly { day_of_month: 31 };
        assert!(!last.matches(date(2024, 4, 30)));
        assert!(!last.matches(date(2024, 5, 1)));
        assert!(last.matches(date(2024, 5, 31)));
    }

    #[test]
    fn weekday_index_counts_from_sunday() {
        assert_eq!(weekday_index(Weekday::Sun), 0);
        assert_eq!(weekday_index(Weekday::Mon), 1);
        assert_eq!(weekday_index(Weekday::Sat), 6);
        assert_eq!(weekday_from_index(2), Some(Weekday::Tue));
        assert_eq!(weekday_from_index(7), None);
        assert_eq!(weekday_from_index(-1), None);
    }

    #[test]
    fn columns_ignore_days_that_do_not_apply() {
        assert_eq!(
            Cadence::from_columns(RecurringType::Daily, Some(3), Some(12)).unwrap(),
            Cadence::Daily
        );
        assert!(Cadence::from_columns(RecurringType::Weekly, None, Some(12)).is_err());
        assert!(Cadence::from_columns(RecurringType::Monthly, Some(1), Some(32)).is_err());
    }

    #[test]
    fn recurring_type_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<RecurringType>().unwrap(), RecurringType::Weekly);
        assert!("yearly".parse::<RecurringType>().is_err());
    }
}
