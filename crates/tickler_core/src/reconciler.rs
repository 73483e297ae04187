//! Applies validated operations to storage on behalf of a user.
//!
//! Stateless: every call resolves the user's timezone, performs the
//! owner-scoped store call(s), and reports an [`Outcome`]. Operations in a
//! batch are independent; one failing does not stop the rest.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime};
use chrono_tz::Tz;
use tickler_db::{
    Cadence, NewRecurringReminder, NewReminder, RecurringReminder, TicklerDb, queries,
};
use tracing::{debug, warn};

use crate::agenda::Agenda;
use crate::clock::Clock;
use crate::error::Result;
use crate::operation::{ListRange, Operation, OperationRequest, ReminderRef};
use crate::projector::project;
use crate::timezone::{UserTimezones, day_range, local_date, local_to_utc};

/// Who an operation acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub chat_id: i64,
    pub user_id: i64,
}

/// What an operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created {
        id: i64,
        label: String,
        fire_at: DateTime<Tz>,
        is_todo: bool,
    },
    CreatedRecurring {
        id: i64,
        label: String,
        cadence: Cadence,
        time: NaiveTime,
        is_todo: bool,
    },
    Updated(ReminderRef),
    Deleted(ReminderRef),
    /// Target missing, owned by someone else, already delivered or inactive.
    NotFoundOrNotYours(ReminderRef),
    Agenda(Agenda),
    Recurring(Vec<RecurringReminder>),
}

/// The result of one operation in a batch, with the parser's reply text.
#[derive(Debug)]
pub struct Applied {
    pub answer: Option<String>,
    pub result: Result<Outcome>,
}

#[derive(Clone)]
pub struct OperationReconciler {
    db: TicklerDb,
    timezones: UserTimezones,
    clock: Arc<dyn Clock>,
}

impl OperationReconciler {
    pub fn new(db: TicklerDb, timezones: UserTimezones, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            timezones,
            clock,
        }
    }

    /// Validate and apply every request, in order.
    pub async fn apply_batch(&self, who: Requester, requests: Vec<OperationRequest>) -> Vec<Applied> {
        let mut applied = Vec::with_capacity(requests.len());
        for request in requests {
            let answer = request.answer.clone();
            let result = self.apply_request(who, request).await;
            if let Err(e) = &result {
                warn!(user_id = who.user_id, "operation rejected: {}", e);
            }
            applied.push(Applied { answer, result });
        }
        applied
    }

    /// Validate one request and apply it.
    pub async fn apply_request(&self, who: Requester, request: OperationRequest) -> Result<Outcome> {
        let operation = Operation::try_from(request)?;
        self.apply(who, &operation).await
    }

    pub async fn apply(&self, who: Requester, operation: &Operation) -> Result<Outcome> {
        debug!(user_id = who.user_id, ?operation, "applying operation");
        match operation {
            Operation::Create {
                label,
                fire_at,
                is_todo,
            } => {
                let tz = self.timezones.timezone_of(who.user_id).await?;
                let fire_at = local_to_utc(tz, *fire_at)?;
                let id = queries::add_reminder(
                    &self.db,
                    &NewReminder {
                        chat_id: who.chat_id,
                        user_id: who.user_id,
                        fire_at,
                        label: label.clone(),
                        is_todo: *is_todo,
                    },
                )
                .await?;
                Ok(Outcome::Created {
                    id,
                    label: label.clone(),
                    fire_at: fire_at.with_timezone(&tz),
                    is_todo: *is_todo,
                })
            }

            Operation::CreateRecurring {
                label,
                cadence,
                time,
                is_todo,
            } => {
                let id = queries::add_recurring(
                    &self.db,
                    &NewRecurringReminder {
                        chat_id: who.chat_id,
                        user_id: who.user_id,
                        label: label.clone(),
                        cadence: *cadence,
                        time: *time,
                        is_todo: *is_todo,
                    },
                )
                .await?;
                Ok(Outcome::CreatedRecurring {
                    id,
                    label: label.clone(),
                    cadence: *cadence,
                    time: *time,
                    is_todo: *is_todo,
                })
            }

            Operation::AdjustReminder { id, fire_at, label } => {
                let target = ReminderRef::OneShot(*id);
                let fire_at = match fire_at {
                    Some(local) => {
                        let tz = self.timezones.timezone_of(who.user_id).await?;
                        Some(local_to_utc(tz, *local)?)
                    }
                    None => None,
                };
                let updated = match (fire_at, label.as_deref()) {
                    (Some(at), Some(label)) => {
                        queries::update_reminder(&self.db, *id, who.user_id, at, label).await?
                    }
                    (Some(at), None) => {
                        queries::update_reminder_time(&self.db, *id, who.user_id, at).await?
                    }
                    (None, Some(label)) => {
                        queries::update_reminder_label(&self.db, *id, who.user_id, label).await?
                    }
                    // Validation guarantees at least one field.
                    (None, None) => false,
                };
                Ok(changed(updated, Outcome::Updated(target), target))
            }

            Operation::AdjustRecurring { id, patch } => {
                let target = ReminderRef::Recurring(*id);
                let Some(existing) = queries::get_recurring(self.db.pool(), *id, who.user_id).await?
                else {
                    return Ok(Outcome::NotFoundOrNotYours(target));
                };
                let changes = patch.apply(&existing)?;
                let updated = queries::update_recurring(&self.db, *id, who.user_id, &changes).await?;
                Ok(changed(updated, Outcome::Updated(target), target))
            }

            Operation::Delete(target) => {
                let deleted = match target {
                    ReminderRef::OneShot(id) => {
                        queries::delete_reminder(&self.db, *id, who.user_id).await?
                    }
                    ReminderRef::Recurring(id) => {
                        queries::delete_recurring(&self.db, *id, who.user_id).await?
                    }
                };
                Ok(changed(deleted, Outcome::Deleted(*target), *target))
            }

            Operation::ShowList(range) => self.agenda(who.user_id, *range).await.map(Outcome::Agenda),

            Operation::ShowRecurring => {
                let definitions = queries::list_active_recurring(self.db.pool(), who.user_id).await?;
                Ok(Outcome::Recurring(definitions))
            }
        }
    }

    /// Build the list view for `range` in the user's timezone.
    pub async fn agenda(&self, user_id: i64, range: ListRange) -> Result<Agenda> {
        let tz = self.timezones.timezone_of(user_id).await?;
        let today = local_date(tz, self.clock.now());

        match range {
            ListRange::All => {
                let reminders = queries::list_active_reminders(self.db.pool(), user_id).await?;
                Ok(Agenda::build(tz, today, &reminders, Vec::new()))
            }
            ListRange::Days { first, last } => {
                let (start, end) = day_range(tz, first, last);
                let reminders =
                    queries::list_reminders_in_period(self.db.pool(), user_id, start, end).await?;
                let definitions = queries::list_active_recurring(self.db.pool(), user_id).await?;
                let after_last = last.checked_add_days(Days::new(1)).unwrap_or(last);
                let occurrences = project(&definitions, first, after_last);
                Ok(Agenda::build(tz, today, &reminders, occurrences))
            }
        }
    }
}

fn changed(hit: bool, outcome: Outcome, target: ReminderRef) -> Outcome {
    if hit {
        outcome
    } else {
        Outcome::NotFoundOrNotYours(target)
    }
}
