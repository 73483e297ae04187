//! Recurring definition queries.
//!
//! Deletion is logical: `active` flips to false and the row stays. Inactive
//! definitions are invisible to every query here.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::connection::TicklerDb;
use crate::error::{DbError, DbResult};
use crate::models::{
    NewRecurringReminder, RecurringChanges, RecurringReminder, RecurringReminderRow,
    TriggerCandidate, TriggerCandidateRow, format_time, whole_seconds,
};

/// Insert a definition and return its id.
///
/// The cadence type guarantees only the applicable day column is written.
pub async fn add_recurring(db: &TicklerDb, definition: &NewRecurringReminder) -> DbResult<i64> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        r#"
        INSERT INTO recurring_reminders
            (chat_id, user_id, label, created_at, recurring_type, time, day_of_week, day_of_month, is_todo)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(definition.chat_id)
    .bind(definition.user_id)
    .bind(&definition.label)
    .bind(whole_seconds(Utc::now()))
    .bind(definition.cadence.kind())
    .bind(format_time(definition.time))
    .bind(definition.cadence.day_of_week())
    .bind(definition.cadence.day_of_month())
    .bind(definition.is_todo)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;

    let id = result.last_insert_rowid();
    debug!(recurring_id = id, user_id = definition.user_id, "recurring reminder added");
    Ok(id)
}

/// Active definitions of a user, newest first.
pub async fn list_active_recurring(
    pool: &SqlitePool,
    user_id: i64,
) -> DbResult<Vec<RecurringReminder>> {
    let rows = sqlx::query_as::<_, RecurringReminderRow>(
        r#"
        SELECT id, chat_id, user_id, label, created_at, recurring_type, time,
               day_of_week, day_of_month, last_triggered, active, is_todo
        FROM recurring_reminders
        WHERE user_id = ? AND active = 1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RecurringReminder::try_from).collect()
}

/// An active definition owned by `user_id`.
pub async fn get_recurring(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> DbResult<Option<RecurringReminder>> {
    let row = sqlx::query_as::<_, RecurringReminderRow>(
        r#"
        SELECT id, chat_id, user_id, label, created_at, recurring_type, time,
               day_of_week, day_of_month, last_triggered, active, is_todo
        FROM recurring_reminders
        WHERE id = ? AND user_id = ? AND active = 1
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(RecurringReminder::try_from).transpose()
}

/// Replace label, cadence and time of an active definition.
///
/// Leaves `last_triggered` alone, so moving a definition that already fired
/// today to a later time does not fire it twice today.
pub async fn update_recurring(
    db: &TicklerDb,
    id: i64,
    user_id: i64,
    changes: &RecurringChanges,
) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        r#"
        UPDATE recurring_reminders
        SET label = ?, recurring_type = ?, time = ?, day_of_week = ?, day_of_month = ?
        WHERE id = ? AND user_id = ? AND active = 1
        "#,
    )
    .bind(&changes.label)
    .bind(changes.cadence.kind())
    .bind(format_time(changes.time))
    .bind(changes.cadence.day_of_week())
    .bind(changes.cadence.day_of_month())
    .bind(id)
    .bind(user_id)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Deactivate a definition. There is no way back.
pub async fn delete_recurring(db: &TicklerDb, id: i64, user_id: i64) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        "UPDATE recurring_reminders SET active = 0 WHERE id = ? AND user_id = ? AND active = 1",
    )
    .bind(id)
    .bind(user_id)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Triggering
// ============================================================================

const SELECT_CANDIDATES: &str = r#"
    SELECT r.id, r.chat_id, r.user_id, r.label, r.created_at, r.recurring_type, r.time,
           r.day_of_week, r.day_of_month, r.last_triggered, r.active, r.is_todo,
           p.timezone AS timezone
    FROM recurring_reminders r
    LEFT JOIN user_preferences p ON p.user_id = r.user_id
    WHERE r.active = 1 AND r.is_todo = 0
    ORDER BY r.id ASC
"#;

/// Every active, non-todo definition with its owner's timezone.
///
/// Whether a candidate is due depends on the owner's local clock, so the
/// time-of-day, pattern and watermark checks happen in the caller.
pub async fn list_trigger_candidates(pool: &SqlitePool) -> DbResult<Vec<TriggerCandidate>> {
    let rows = sqlx::query_as::<_, TriggerCandidateRow>(SELECT_CANDIDATES)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(TriggerCandidate::try_from).collect()
}

/// Record that a definition fired at `at`.
pub async fn mark_recurring_triggered(db: &TicklerDb, id: i64, at: DateTime<Utc>) -> DbResult<()> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query("UPDATE recurring_reminders SET last_triggered = ? WHERE id = ?")
        .bind(whole_seconds(at))
        .bind(id)
        .execute(tx.conn())
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::not_found("recurring reminder", id));
    }
    tx.commit().await
}

/// Select the candidates `is_due` accepts and stamp them triggered at `now`,
/// in one transaction.
pub async fn claim_due_recurring<F>(
    db: &TicklerDb,
    now: DateTime<Utc>,
    is_due: F,
) -> DbResult<Vec<TriggerCandidate>>
where
    F: Fn(&TriggerCandidate) -> bool,
{
    let mut tx = db.begin_write().await?;
    let rows = sqlx::query_as::<_, TriggerCandidateRow>(SELECT_CANDIDATES)
        .fetch_all(&mut *tx.conn())
        .await?;

    let mut claimed = Vec::new();
    for row in rows {
        let candidate = TriggerCandidate::try_from(row)?;
        if !is_due(&candidate) {
            continue;
        }
        sqlx::query("UPDATE recurring_reminders SET last_triggered = ? WHERE id = ?")
            .bind(whole_seconds(now))
            .bind(candidate.reminder.id)
            .execute(&mut *tx.conn())
            .await?;
        claimed.push(candidate);
    }
    tx.commit().await?;

    Ok(claimed
        .into_iter()
        .map(|mut candidate| {
            candidate.reminder.last_triggered = Some(whole_seconds(now));
            candidate
        })
        .collect())
}
