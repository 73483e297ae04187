//! What must fire now.
//!
//! One-shot: undelivered, not a todo, `fire_at <= now`.
//!
//! Recurring: active, not a todo, the pattern lands on the owner's local
//! date, the owner's local clock (truncated to the minute) is within the
//! grace window after the definition's time, and the watermark is from an
//! earlier local day.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use tickler_db::{RecurringReminder, Reminder, TicklerDb, TriggerCandidate, queries};

use crate::error::Result;
use crate::timezone::{parse_or_default, start_of_day};

/// A recurring definition selected for firing, with the zone it was
/// evaluated in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRecurring {
    pub reminder: RecurringReminder,
    pub timezone: Tz,
}

/// Whether `reminder` should fire at `now` when its owner lives in `tz`.
///
/// `grace` of one minute is an exact minute match. Wider windows tolerate
/// late ticks; they never wrap past local midnight.
pub fn is_recurring_due(
    reminder: &RecurringReminder,
    tz: Tz,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    if !reminder.active || reminder.is_todo {
        return false;
    }

    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    if !reminder.cadence.matches(today) {
        return false;
    }

    let Some(minute) = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0) else {
        return false;
    };
    let late_by = minute.signed_duration_since(reminder.time);
    if late_by < Duration::zero() || late_by >= grace {
        return false;
    }

    match reminder.last_triggered {
        None => true,
        Some(last) => last < start_of_day(tz, today),
    }
}

/// Selects due items and, when claiming, consumes them atomically.
#[derive(Debug, Clone)]
pub struct DueSelector {
    db: TicklerDb,
    default_zone: Tz,
    grace: Duration,
}

impl DueSelector {
    pub fn new(db: TicklerDb, default_zone: Tz, grace: Duration) -> Self {
        Self {
            db,
            default_zone,
            grace,
        }
    }

    fn zone_of(&self, candidate: &TriggerCandidate) -> Tz {
        candidate
            .timezone
            .as_deref()
            .map(|name| parse_or_default(name, self.default_zone))
            .unwrap_or(self.default_zone)
    }

    fn accept(&self, candidate: &TriggerCandidate, now: DateTime<Utc>) -> bool {
        is_recurring_due(&candidate.reminder, self.zone_of(candidate), now, self.grace)
    }

    fn resolve(&self, candidate: TriggerCandidate) -> DueRecurring {
        let timezone = self.zone_of(&candidate);
        DueRecurring {
            reminder: candidate.reminder,
            timezone,
        }
    }

    /// Due one-shot reminders, without marking them.
    pub async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        Ok(queries::list_due_reminders(self.db.pool(), now).await?)
    }

    /// Due recurring definitions, without touching their watermark.
    pub async fn due_recurring(&self, now: DateTime<Utc>) -> Result<Vec<DueRecurring>> {
        let candidates = queries::list_trigger_candidates(self.db.pool()).await?;
        Ok(candidates
            .into_iter()
            .filter(|c| self.accept(c, now))
            .map(|c| self.resolve(c))
            .collect())
    }

    /// Due one-shot reminders, marked notified in the same transaction.
    pub async fn claim_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        Ok(queries::claim_due_reminders(&self.db, now).await?)
    }

    /// Due recurring definitions, stamped triggered at `now` in the same
    /// transaction.
    pub async fn claim_recurring(&self, now: DateTime<Utc>) -> Result<Vec<DueRecurring>> {
        let claimed = queries::claim_due_recurring(&self.db, now, |c| self.accept(c, now)).await?;
        Ok(claimed.into_iter().map(|c| self.resolve(c)).collect())
    }
}
