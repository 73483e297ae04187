//! List views: pending one-shot reminders merged with recurring occurrences,
//! grouped by local day.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use tickler_db::Reminder;

use crate::projector::Occurrence;

/// Where an agenda entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Reminder(i64),
    Recurring(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaEntry {
    pub source: EntrySource,
    pub label: String,
    /// Local time of day
    pub time: NaiveTime,
    pub is_todo: bool,
}

impl AgendaEntry {
    pub fn is_recurring(&self) -> bool {
        matches!(self.source, EntrySource::Recurring(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaDay {
    pub date: NaiveDate,
    pub entries: Vec<AgendaEntry>,
}

/// A list view, days ascending. Days without entries are left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agenda {
    /// The owner's local date when the agenda was built
    pub today: NaiveDate,
    pub days: Vec<AgendaDay>,
}

impl Agenda {
    /// Group `reminders` and `occurrences` by local day.
    ///
    /// Within a day todos come first, then timed entries by time of day.
    /// Entries at the same time keep their input order, one-shot reminders
    /// before recurring occurrences.
    pub fn build(
        tz: Tz,
        today: NaiveDate,
        reminders: &[Reminder],
        occurrences: Vec<Occurrence>,
    ) -> Self {
        let mut by_day: BTreeMap<NaiveDate, Vec<AgendaEntry>> = BTreeMap::new();

        for reminder in reminders {
            let local = reminder.fire_at.with_timezone(&tz);
            by_day.entry(local.date_naive()).or_default().push(AgendaEntry {
                source: EntrySource::Reminder(reminder.id),
                label: reminder.label.clone(),
                time: local.time(),
                is_todo: reminder.is_todo,
            });
        }

        for occurrence in occurrences {
            by_day.entry(occurrence.date).or_default().push(AgendaEntry {
                source: EntrySource::Recurring(occurrence.definition_id),
                label: occurrence.label,
                time: occurrence.time,
                is_todo: occurrence.is_todo,
            });
        }

        let days = by_day
            .into_iter()
            .map(|(date, mut entries)| {
                entries.sort_by_key(|e| (!e.is_todo, e.time));
                AgendaDay { date, entries }
            })
            .collect();

        Self { today, days }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
