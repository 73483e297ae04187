//! Per-user preference queries.

use chrono::Utc;
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tracing::info;

use crate::connection::TicklerDb;
use crate::error::{DbError, DbResult};
use crate::models::{UserPreferences, whole_seconds};

/// Stored preferences of a user, if any.
pub async fn get_preferences(pool: &SqlitePool, user_id: i64) -> DbResult<Option<UserPreferences>> {
    let prefs = sqlx::query_as::<_, UserPreferences>(
        "SELECT user_id, timezone, created_at, updated_at FROM user_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(prefs)
}

/// Timezone of a user, storing `default` on first read.
pub async fn get_timezone(db: &TicklerDb, user_id: i64, default: &str) -> DbResult<String> {
    if let Some(prefs) = get_preferences(db.pool(), user_id).await? {
        return Ok(prefs.timezone);
    }

    let now = whole_seconds(Utc::now());
    let mut tx = db.begin_write().await?;
    // Another task may have created the row since the read above.
    sqlx::query(
        r#"
        INSERT INTO user_preferences (user_id, timezone, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(default)
    .bind(now)
    .bind(now)
    .execute(&mut *tx.conn())
    .await?;
    let (timezone,): (String,) =
        sqlx::query_as("SELECT timezone FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx.conn())
            .await?;
    tx.commit().await?;

    Ok(timezone)
}

/// Set a user's timezone.
///
/// Names outside the IANA database are rejected with
/// [`DbError::InvalidTimezone`] and the stored value stays as it was.
pub async fn set_timezone(db: &TicklerDb, user_id: i64, timezone: &str) -> DbResult<()> {
    let tz: Tz = timezone
        .trim()
        .parse()
        .map_err(|_| DbError::invalid_timezone(timezone))?;

    let now = whole_seconds(Utc::now());
    let mut tx = db.begin_write().await?;
    sqlx::query(
        r#"
        INSERT INTO user_preferences (user_id, timezone, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET timezone = excluded.timezone, updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(tz.name())
    .bind(now)
    .bind(now)
    .execute(tx.conn())
    .await?;
    tx.commit().await?;

    info!(user_id, timezone = tz.name(), "timezone updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_TIMEZONE;

    #[tokio::test]
    async fn test_default_is_stored_on_first_read() {
        let db = TicklerDb::open_in_memory().await.unwrap();
        assert!(get_preferences(db.pool(), 7).await.unwrap().is_none());

        let tz = get_timezone(&db, 7, DEFAULT_TIMEZONE).await.unwrap();
        assert_eq!(tz, "Europe/Moscow");

        let prefs = get_preferences(db.pool(), 7).await.unwrap().unwrap();
        assert_eq!(prefs.timezone, "Europe/Moscow");

        // A later default does not override what is stored
        let tz = get_timezone(&db, 7, "UTC").await.unwrap();
        assert_eq!(tz, "Europe/Moscow");
    }

    #[tokio::test]
    async fn test_set_timezone_upserts() {
        let db = TicklerDb::open_in_memory().await.unwrap();
        set_timezone(&db, 7, "Asia/Tokyo").await.unwrap();
        assert_eq!(get_timezone(&db, 7, DEFAULT_TIMEZONE).await.unwrap(), "Asia/Tokyo");

        set_timezone(&db, 7, "America/New_York").await.unwrap();
        assert_eq!(
            get_timezone(&db, 7, DEFAULT_TIMEZONE).await.unwrap(),
            "America/New_York"
        );
    }

    #[tokio::test]
    async fn test_invalid_timezone_keeps_previous() {
        let db = TicklerDb::open_in_memory().await.unwrap();
        set_timezone(&db, 7, "Asia/Tokyo").await.unwrap();

        let err = set_timezone(&db, 7, "Mars/Olympus_Mons").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidTimezone { .. }));
        assert_eq!(get_timezone(&db, 7, DEFAULT_TIMEZONE).await.unwrap(), "Asia/Tokyo");
    }
}
