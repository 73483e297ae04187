//! Calendar projection of recurring definitions.
//!
//! Pure and deterministic: no clock, no storage. The watermark is ignored,
//! so a definition that already fired today still shows up today.

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tickler_db::RecurringReminder;

/// One calendar-dated instance of a recurring definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub definition_id: i64,
    pub label: String,
    pub time: NaiveTime,
    pub date: NaiveDate,
    pub is_todo: bool,
}

/// Every occurrence of the active `definitions` on days in `[start, end)`.
///
/// Output is ordered by date, then by the order of `definitions`.
pub fn project(definitions: &[RecurringReminder], start: NaiveDate, end: NaiveDate) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    let mut day = start;
    while day < end {
        for definition in definitions.iter().filter(|d| d.active) {
            if definition.cadence.matches(day) {
                occurrences.push(Occurrence {
                    definition_id: definition.id,
                    label: definition.label.clone(),
                    time: definition.time,
                    date: day,
                    is_todo: definition.is_todo,
                });
            }
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    occurrences
}
