//! Plain-text rendering of outcomes and notifications.

use std::fmt::Write;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use tickler_db::{Cadence, DbError, RecurringReminder, Reminder};

use crate::agenda::{Agenda, AgendaDay, AgendaEntry};
use crate::error::{CoreError, ValidationError};
use crate::operation::ReminderRef;
use crate::reconciler::Outcome;

pub const REGULAR_TAG: &str = "(regular)";

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// "every day at 09:00", "every Tuesday at 19:00", "every month on day 5 at 10:00"
pub fn describe_schedule(cadence: &Cadence, time: NaiveTime) -> String {
    match cadence {
        Cadence::Daily => format!("every day at {}", hhmm(time)),
        Cadence::Weekly { day_of_week } => {
            format!("every {} at {}", weekday_name(*day_of_week), hhmm(time))
        }
        Cadence::Monthly { day_of_month } => {
            format!("every month on day {} at {}", day_of_month, hhmm(time))
        }
    }
}

pub fn describe_recurring(definition: &RecurringReminder) -> String {
    describe_schedule(&definition.cadence, definition.time)
}

/// Text sent when a one-shot reminder fires.
pub fn reminder_notification(reminder: &Reminder) -> String {
    format!("⏰ Reminder: {}", reminder.label)
}

/// Text sent when a recurring definition fires.
pub fn recurring_notification(definition: &RecurringReminder) -> String {
    format!(
        "🔁 Reminder: {}\n{}",
        definition.label,
        describe_recurring(definition)
    )
}

fn day_title(date: NaiveDate, today: NaiveDate) -> String {
    let formatted = date.format("%d.%m.%Y");
    if date == today {
        format!("Today, {formatted}")
    } else if today.succ_opt() == Some(date) {
        format!("Tomorrow, {formatted}")
    } else {
        format!("{}, {formatted}", weekday_name(date.weekday()))
    }
}

fn render_entry(out: &mut String, entry: &AgendaEntry) {
    let tag = if entry.is_recurring() {
        format!(" {REGULAR_TAG}")
    } else {
        String::new()
    };
    if entry.is_todo {
        let _ = writeln!(out, "  ☐ {}{}", entry.label, tag);
    } else {
        let _ = writeln!(out, "  {} {}{}", hhmm(entry.time), entry.label, tag);
    }
}

fn render_day(out: &mut String, day: &AgendaDay, today: NaiveDate) {
    let _ = writeln!(out, "{}", day_title(day.date, today));
    for entry in &day.entries {
        render_entry(out, entry);
    }
}

pub fn render_agenda(agenda: &Agenda) -> String {
    if agenda.is_empty() {
        return "You have no reminders for this period.".to_string();
    }
    let mut out = String::new();
    for (i, day) in agenda.days.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_day(&mut out, day, agenda.today);
    }
    out.trim_end().to_string()
}

pub fn render_recurring_list(definitions: &[RecurringReminder]) -> String {
    if definitions.is_empty() {
        return "You have no recurring reminders.".to_string();
    }
    let mut out = String::from("Recurring reminders:\n");
    for definition in definitions {
        let todo = if definition.is_todo { " (todo)" } else { "" };
        let _ = writeln!(
            out,
            "  {}{} - {}",
            definition.label,
            todo,
            describe_recurring(definition)
        );
    }
    out.trim_end().to_string()
}

fn what(target: &ReminderRef) -> &'static str {
    match target {
        ReminderRef::OneShot(_) => "Reminder",
        ReminderRef::Recurring(_) => "Recurring reminder",
    }
}

/// Default confirmation text for an outcome.
pub fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Created {
            label,
            fire_at,
            is_todo,
            ..
        } => {
            let when = fire_at.format("%d.%m.%Y %H:%M");
            if *is_todo {
                format!("Added to your todo list: {label} (due {when})")
            } else {
                format!("Reminder set: {label} at {when}")
            }
        }
        Outcome::CreatedRecurring {
            label,
            cadence,
            time,
            ..
        } => format!(
            "Recurring reminder set: {label}, {}",
            describe_schedule(cadence, *time)
        ),
        Outcome::Updated(target) => format!("{} updated.", what(target)),
        Outcome::Deleted(target) => format!("{} deleted.", what(target)),
        Outcome::NotFoundOrNotYours(_) => {
            "Reminder not found or it does not belong to you.".to_string()
        }
        Outcome::Agenda(agenda) => render_agenda(agenda),
        Outcome::Recurring(definitions) => render_recurring_list(definitions),
    }
}

/// Reply for an operation or request that failed.
///
/// Validation problems are explained; storage and upstream problems are not.
pub fn render_failure(error: &CoreError) -> String {
    match error {
        CoreError::Validation(ValidationError::NothingToChange) => {
            "Nothing to change: tell me the new time or text.".to_string()
        }
        CoreError::Validation(ValidationError::UnknownAction) => {
            "Sorry, I don't know how to do that.".to_string()
        }
        CoreError::Validation(e) => format!("Invalid format: {e}."),
        CoreError::Database(DbError::InvalidTimezone { name }) => {
            format!("Unknown timezone {name:?}. Use a name like Europe/Moscow.")
        }
        CoreError::Upstream { .. } => {
            "Sorry, I couldn't understand that. Please try rephrasing.".to_string()
        }
        _ => "Something went wrong, the operation was not applied.".to_string(),
    }
}
