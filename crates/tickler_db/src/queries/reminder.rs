//! One-shot reminder queries.
//!
//! Every owner-facing mutation is scoped by `user_id` and skips rows that
//! were already delivered, so "not found", "not yours" and "already fired"
//! all come back as `false`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::connection::TicklerDb;
use crate::error::{DbError, DbResult};
use crate::models::{NewReminder, Reminder, whole_seconds};

// ============================================================================
// Create / update / delete
// ============================================================================

/// Insert a reminder and return its id.
///
/// Identical reminders are allowed; there is no duplicate detection.
pub async fn add_reminder(db: &TicklerDb, reminder: &NewReminder) -> DbResult<i64> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        r#"
        INSERT INTO reminders (chat_id, user_id, fire_at, label, is_todo)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(reminder.chat_id)
    .bind(reminder.user_id)
    .bind(whole_seconds(reminder.fire_at))
    .bind(&reminder.label)
    .bind(reminder.is_todo)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;

    let id = result.last_insert_rowid();
    debug!(reminder_id = id, user_id = reminder.user_id, "reminder added");
    Ok(id)
}

/// Move a pending reminder to a new time.
pub async fn update_reminder_time(
    db: &TicklerDb,
    id: i64,
    user_id: i64,
    fire_at: DateTime<Utc>,
) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        "UPDATE reminders SET fire_at = ? WHERE id = ? AND user_id = ? AND notified = 0",
    )
    .bind(whole_seconds(fire_at))
    .bind(id)
    .bind(user_id)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Rename a pending reminder.
pub async fn update_reminder_label(
    db: &TicklerDb,
    id: i64,
    user_id: i64,
    label: &str,
) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result =
        sqlx::query("UPDATE reminders SET label = ? WHERE id = ? AND user_id = ? AND notified = 0")
            .bind(label)
            .bind(id)
            .bind(user_id)
            .execute(tx.conn())
            .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Change time and label of a pending reminder in one statement.
pub async fn update_reminder(
    db: &TicklerDb,
    id: i64,
    user_id: i64,
    fire_at: DateTime<Utc>,
    label: &str,
) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query(
        r#"
        UPDATE reminders SET fire_at = ?, label = ?
        WHERE id = ? AND user_id = ? AND notified = 0
        "#,
    )
    .bind(whole_seconds(fire_at))
    .bind(label)
    .bind(id)
    .bind(user_id)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Hard-delete a pending reminder.
pub async fn delete_reminder(db: &TicklerDb, id: i64, user_id: i64) -> DbResult<bool> {
    let mut tx = db.begin_write().await?;
    let result = sqlx::query("DELETE FROM reminders WHERE id = ? AND user_id = ? AND notified = 0")
        .bind(id)
        .bind(user_id)
        .execute(tx.conn())
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Listing
// ============================================================================

/// Get a pending reminder owned by `user_id`.
pub async fn get_reminder(pool: &SqlitePool, id: i64, user_id: i64) -> DbResult<Option<Reminder>> {
    let reminder = sqlx::query_as::<_, Reminder>(
        r#"
        SELECT id, chat_id, user_id, fire_at, label, notified, is_todo
        FROM reminders WHERE id = ? AND user_id = ? AND notified = 0
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(reminder)
}

/// Get a reminder by id if it is still pending, whoever owns it.
///
/// Used by delivery to re-check a row selected earlier in the tick.
pub async fn get_pending_reminder(pool: &SqlitePool, id: i64) -> DbResult<Option<Reminder>> {
    let reminder = sqlx::query_as::<_, Reminder>(
        r#"
        SELECT id, chat_id, user_id, fire_at, label, notified, is_todo
        FROM reminders WHERE id = ? AND notified = 0
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(reminder)
}

/// All pending reminders of a user, earliest first.
pub async fn list_active_reminders(pool: &SqlitePool, user_id: i64) -> DbResult<Vec<Reminder>> {
    let reminders = sqlx::query_as::<_, Reminder>(
        r#"
        SELECT id, chat_id, user_id, fire_at, label, notified, is_todo
        FROM reminders WHERE user_id = ? AND notified = 0
        ORDER BY fire_at ASC, id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(reminders)
}

/// Pending reminders of a user with `start <= fire_at < end`.
pub async fn list_reminders_in_period(
    pool: &SqlitePool,
    user_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DbResult<Vec<Reminder>> {
    let reminders = sqlx::query_as::<_, Reminder>(
        r#"
        SELECT id, chat_id, user_id, fire_at, label, notified, is_todo
        FROM reminders
        WHERE user_id = ? AND notified = 0 AND fire_at >= ? AND fire_at < ?
        ORDER BY fire_at ASC, id ASC
        "#,
    )
    .bind(user_id)
    .bind(whole_seconds(start))
    .bind(whole_seconds(end))
    .fetch_all(pool)
    .await?;
    Ok(reminders)
}

const SELECT_DUE: &str = r#"
    SELECT id, chat_id, user_id, fire_at, label, notified, is_todo
    FROM reminders
    WHERE notified = 0 AND is_todo = 0 AND fire_at <= ?
    ORDER BY fire_at ASC, id ASC
"#;

/// Undelivered, non-todo reminders of every user with `fire_at <= before`.
pub async fn list_due_reminders(pool: &SqlitePool, before: DateTime<Utc>) -> DbResult<Vec<Reminder>> {
    let reminders = sqlx::query_as::<_, Reminder>(SELECT_DUE)
        .bind(whole_seconds(before))
        .fetch_all(pool)
        .await?;
    Ok(reminders)
}

// ============================================================================
// Delivery bookkeeping
// ============================================================================

async fn set_notified(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
    let result = sqlx::query("UPDATE reminders SET notified = 1 WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::not_found("reminder", id));
    }
    Ok(())
}

/// Mark a single reminder as delivered.
pub async fn mark_reminder_notified(db: &TicklerDb, id: i64) -> DbResult<()> {
    let mut tx = db.begin_write().await?;
    set_notified(tx.conn(), id).await?;
    tx.commit().await
}

/// Mark a batch of reminders as delivered, all or nothing.
///
/// Fails with [`DbError::NotFound`] if any id has no row; in that case no id
/// in the batch is marked.
pub async fn mark_reminders_notified(db: &TicklerDb, ids: &[i64]) -> DbResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut tx = db.begin_write().await?;
    for id in ids {
        // Returning early drops `tx`, which rolls back the ids already marked.
        set_notified(tx.conn(), *id).await?;
    }
    tx.commit().await?;

    debug!(count = ids.len(), "reminders marked notified");
    Ok(())
}

/// Mark delivered reminders in one statement, skipping ids that are gone.
///
/// Rows deleted or already marked since they were read are not an error;
/// returns how many rows actually changed.
pub async fn mark_delivered_reminders(db: &TicklerDb, ids: &[i64]) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("UPDATE reminders SET notified = 1 WHERE id IN ({placeholders}) AND notified = 0");

    let mut tx = db.begin_write().await?;
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let marked = query.execute(&mut *tx.conn()).await?.rows_affected();
    tx.commit().await?;

    if marked < ids.len() as u64 {
        debug!(requested = ids.len(), marked, "some delivered reminders were already gone");
    }
    Ok(marked)
}

/// Select every due reminder and mark it delivered in the same transaction.
///
/// Callers own the returned reminders exclusively: no other claim, update
/// or delete can observe them as pending afterwards.
pub async fn claim_due_reminders(db: &TicklerDb, before: DateTime<Utc>) -> DbResult<Vec<Reminder>> {
    let mut tx = db.begin_write().await?;
    let due = sqlx::query_as::<_, Reminder>(SELECT_DUE)
        .bind(whole_seconds(before))
        .fetch_all(&mut *tx.conn())
        .await?;

    for reminder in &due {
        set_notified(tx.conn(), reminder.id).await?;
    }
    tx.commit().await?;

    Ok(due
        .into_iter()
        .map(|reminder| Reminder {
            notified: true,
            ..reminder
        })
        .collect())
}
