//! Broadcast audience.

use sqlx::SqlitePool;

use crate::error::DbResult;

/// Every chat the bot can reasonably reach.
///
/// Union of chats with pending reminders, chats with active recurring
/// definitions, and users with stored preferences (a private chat id equals
/// the user id).
pub async fn active_chat_ids(pool: &SqlitePool) -> DbResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT chat_id FROM reminders WHERE notified = 0
        UNION
        SELECT chat_id FROM recurring_reminders WHERE active = 1
        UNION
        SELECT user_id FROM user_preferences
        ORDER BY 1
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
