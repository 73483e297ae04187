//! Operations requested by the intent parser.
//!
//! The parser hands back loosely shaped [`OperationRequest`] records. They
//! are turned into the closed [`Operation`] enum before anything touches
//! storage, so a malformed field is rejected up front and the dispatcher can
//! match exhaustively.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use tickler_db::{Cadence, RecurringChanges, RecurringReminder, RecurringType};
use tickler_db::models::weekday_from_index;

use crate::error::ValidationError;

/// Action tag on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    CreateRecurring,
    Adjust,
    Delete,
    ShowList,
    ShowRecurring,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One operation as emitted by the parser, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationRequest {
    pub action: Action,
    #[serde(deserialize_with = "lenient_string")]
    pub datetime: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub label: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub reminder_id: Option<String>,
    /// Reply to show instead of the default confirmation
    #[serde(deserialize_with = "lenient_string")]
    pub answer: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub start_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub end_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub recurring_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub day_of_week: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub day_of_month: Option<String>,
    pub is_todo: bool,
}

/// Accept strings, numbers or null. Blank strings read as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(D::Error::custom(format!(
                "expected a string or number, found {other}"
            )));
        }
    };
    Ok(present(Some(text)))
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Target of an adjust or delete.
///
/// One-shot and recurring ids share one namespace toward the parser;
/// recurring ones carry a `rec_` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderRef {
    OneShot(i64),
    Recurring(i64),
}

impl fmt::Display for ReminderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneShot(id) => write!(f, "{id}"),
            Self::Recurring(id) => write!(f, "rec_{id}"),
        }
    }
}

impl FromStr for ReminderRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || ValidationError::BadReminderId(s.to_string());
        match s.strip_prefix("rec_") {
            Some(rest) => rest.parse().map(Self::Recurring).map_err(|_| bad()),
            None => s.parse().map(Self::OneShot).map_err(|_| bad()),
        }
    }
}

/// Which reminders a list request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListRange {
    /// Every pending one-shot reminder, no recurring occurrences
    All,
    /// Local days `first..=last`, with recurring occurrences merged in
    Days { first: NaiveDate, last: NaiveDate },
}

/// Field-wise changes to a recurring definition. `None` keeps the current
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurringPatch {
    pub label: Option<String>,
    pub kind: Option<RecurringType>,
    pub time: Option<NaiveTime>,
    pub day_of_week: Option<Weekday>,
    pub day_of_month: Option<u32>,
}

impl RecurringPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge onto `existing`.
    ///
    /// Switching the kind needs the matching day, either from the patch or
    /// from the existing definition.
    pub fn apply(&self, existing: &RecurringReminder) -> Result<RecurringChanges, ValidationError> {
        let mut changes = RecurringChanges::from_existing(existing);
        if let Some(label) = &self.label {
            changes.label = label.clone();
        }
        if let Some(time) = self.time {
            changes.time = time;
        }

        let kind = self.kind.unwrap_or(existing.cadence.kind());
        changes.cadence = match kind {
            RecurringType::Daily => Cadence::Daily,
            RecurringType::Weekly => {
                let day_of_week = match (self.day_of_week, existing.cadence) {
                    (Some(day), _) => day,
                    (None, Cadence::Weekly { day_of_week }) => day_of_week,
                    (None, _) => return Err(ValidationError::MissingField("day_of_week")),
                };
                Cadence::Weekly { day_of_week }
            }
            RecurringType::Monthly => {
                let day_of_month = match (self.day_of_month, existing.cadence) {
                    (Some(day), _) => day,
                    (None, Cadence::Monthly { day_of_month }) => day_of_month,
                    (None, _) => return Err(ValidationError::MissingField("day_of_month")),
                };
                Cadence::Monthly { day_of_month }
            }
        };
        Ok(changes)
    }
}

/// A validated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// New one-shot reminder (or todo); `fire_at` is owner-local wall time
    Create {
        label: String,
        fire_at: NaiveDateTime,
        is_todo: bool,
    },
    CreateRecurring {
        label: String,
        cadence: Cadence,
        time: NaiveTime,
        is_todo: bool,
    },
    /// At least one of `fire_at`/`label` is set
    AdjustReminder {
        id: i64,
        fire_at: Option<NaiveDateTime>,
        label: Option<String>,
    },
    /// The patch is never empty
    AdjustRecurring { id: i64, patch: RecurringPatch },
    Delete(ReminderRef),
    ShowList(ListRange),
    ShowRecurring,
}

impl TryFrom<OperationRequest> for Operation {
    type Error = ValidationError;

    fn try_from(request: OperationRequest) -> Result<Self, Self::Error> {
        let OperationRequest {
            action,
            datetime,
            label,
            reminder_id,
            answer: _,
            start_date,
            end_date,
            recurring_type,
            time,
            day_of_week,
            day_of_month,
            is_todo,
        } = request;
        let datetime = present(datetime);
        let label = present(label);
        let time = present(time);

        match action {
            Action::Create => {
                let label = label.ok_or(ValidationError::MissingField("label"))?;
                let datetime = datetime.ok_or(ValidationError::MissingField("datetime"))?;
                Ok(Self::Create {
                    label,
                    fire_at: parse_datetime(&datetime)?,
                    is_todo,
                })
            }
            Action::CreateRecurring => {
                let label = label.ok_or(ValidationError::MissingField("label"))?;
                let kind = recurring_type
                    .as_deref()
                    .map(parse_recurring_type)
                    .transpose()?
                    .ok_or(ValidationError::MissingField("recurring_type"))?;
                let time = resolve_time(time.as_deref(), datetime.as_deref())?
                    .ok_or(ValidationError::MissingField("time"))?;
                let cadence = match kind {
                    RecurringType::Daily => Cadence::Daily,
                    RecurringType::Weekly => Cadence::Weekly {
                        day_of_week: parse_day_of_week(
                            day_of_week
                                .as_deref()
                                .ok_or(ValidationError::MissingField("day_of_week"))?,
                        )?,
                    },
                    RecurringType::Monthly => Cadence::Monthly {
                        day_of_month: parse_day_of_month(
                            day_of_month
                                .as_deref()
                                .ok_or(ValidationError::MissingField("day_of_month"))?,
                        )?,
                    },
                };
                Ok(Self::CreateRecurring {
                    label,
                    cadence,
                    time,
                    is_todo,
                })
            }
            Action::Adjust => {
                let target: ReminderRef = reminder_id
                    .as_deref()
                    .ok_or(ValidationError::MissingField("reminder_id"))?
                    .parse()?;
                match target {
                    ReminderRef::OneShot(id) => {
                        let fire_at = datetime.as_deref().map(parse_datetime).transpose()?;
                        if fire_at.is_none() && label.is_none() {
                            return Err(ValidationError::NothingToChange);
                        }
                        Ok(Self::AdjustReminder { id, fire_at, label })
                    }
                    ReminderRef::Recurring(id) => {
                        let patch = RecurringPatch {
                            label,
                            kind: recurring_type
                                .as_deref()
                                .map(parse_recurring_type)
                                .transpose()?,
                            time: resolve_time(time.as_deref(), datetime.as_deref())?,
                            day_of_week: day_of_week.as_deref().map(parse_day_of_week).transpose()?,
                            day_of_month: day_of_month
                                .as_deref()
                                .map(parse_day_of_month)
                                .transpose()?,
                        };
                        if patch.is_empty() {
                            return Err(ValidationError::NothingToChange);
                        }
                        Ok(Self::AdjustRecurring { id, patch })
                    }
                }
            }
            Action::Delete => {
                let target = reminder_id
                    .as_deref()
                    .ok_or(ValidationError::MissingField("reminder_id"))?
                    .parse()?;
                Ok(Self::Delete(target))
            }
            Action::ShowList => {
                let Some(start) = start_date else {
                    return Ok(Self::ShowList(ListRange::All));
                };
                let first = parse_date(&start)?;
                let last = match end_date {
                    Some(end) => parse_date(&end)?,
                    None => first,
                };
                if last < first {
                    return Err(ValidationError::InvertedRange {
                        start: first.to_string(),
                        end: last.to_string(),
                    });
                }
                Ok(Self::ShowList(ListRange::Days { first, last }))
            }
            Action::ShowRecurring => Ok(Self::ShowRecurring),
            Action::Unknown => Err(ValidationError::UnknownAction),
        }
    }
}

// ============================================================================
// Field parsers
// ============================================================================

/// `YYYY-MM-DD HH:MM:SS`, seconds optional.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, ValidationError> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .ok_or_else(|| ValidationError::BadDateTime(s.to_string()))
}

/// `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::BadDate(s.to_string()))
}

/// `HH:MM` (a trailing `:SS` is accepted and dropped).
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    let s = s.trim();
    let time = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ValidationError::BadTime(s.to_string()))?;
    Ok(to_minute(time))
}

fn to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// An explicit time wins; otherwise take the time of day from `datetime`.
fn resolve_time(
    time: Option<&str>,
    datetime: Option<&str>,
) -> Result<Option<NaiveTime>, ValidationError> {
    match (time, datetime) {
        (Some(time), _) => parse_time(time).map(Some),
        (None, Some(datetime)) => parse_datetime(datetime).map(|dt| Some(to_minute(dt.time()))),
        (None, None) => Ok(None),
    }
}

pub fn parse_recurring_type(s: &str) -> Result<RecurringType, ValidationError> {
    s.parse()
        .map_err(|_| ValidationError::BadRecurringType(s.to_string()))
}

/// Day of week from `0`-`6` (0 = Sunday) or an English or Russian name,
/// full or abbreviated.
pub fn parse_day_of_week(s: &str) -> Result<Weekday, ValidationError> {
    let normalized = s.trim().trim_end_matches('.').to_lowercase();
    if let Ok(index) = normalized.parse::<i64>() {
        return weekday_from_index(index).ok_or_else(|| ValidationError::BadDayOfWeek(s.to_string()));
    }

    let day = match normalized.as_str() {
        "sunday" | "sun" | "воскресенье" | "вс" => Weekday::Sun,
        "monday" | "mon" | "понедельник" | "пн" => Weekday::Mon,
        "tuesday" | "tue" | "tues" | "вторник" | "вт" => Weekday::Tue,
        "wednesday" | "wed" | "среда" | "ср" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" | "четверг" | "чт" => Weekday::Thu,
        "friday" | "fri" | "пятница" | "пт" => Weekday::Fri,
        "saturday" | "sat" | "суббота" | "сб" => Weekday::Sat,
        _ => return Err(ValidationError::BadDayOfWeek(s.to_string())),
    };
    Ok(day)
}

/// Day of month, 1-31.
pub fn parse_day_of_month(s: &str) -> Result<u32, ValidationError> {
    s.trim()
        .parse::<u32>()
        .ok()
        .filter(|day| (1..=31).contains(day))
        .ok_or_else(|| ValidationError::BadDayOfMonth(s.to_string()))
}
