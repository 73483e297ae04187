//! Per-user timezones and local calendar arithmetic.
//!
//! Stored instants are UTC. Anything a user thinks of as "today", "Tuesday"
//! or "the 5th" is resolved in that user's zone.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tickler_db::{TicklerDb, queries};
use tracing::warn;

use crate::error::{Result, ValidationError};

/// Resolves and updates user timezones.
#[derive(Debug, Clone)]
pub struct UserTimezones {
    db: TicklerDb,
    default: Tz,
}

impl UserTimezones {
    pub fn new(db: TicklerDb, default: Tz) -> Self {
        Self { db, default }
    }

    /// Zone used for users without a usable stored preference.
    pub fn default_zone(&self) -> Tz {
        self.default
    }

    /// Timezone of `user_id`, persisting the default on first use.
    pub async fn timezone_of(&self, user_id: i64) -> Result<Tz> {
        let name = queries::get_timezone(&self.db, user_id, self.default.name()).await?;
        Ok(parse_or_default(&name, self.default))
    }

    /// Change the timezone of `user_id`. Invalid names leave it unchanged.
    pub async fn set_timezone(&self, user_id: i64, name: &str) -> Result<Tz> {
        queries::set_timezone(&self.db, user_id, name).await?;
        self.timezone_of(user_id).await
    }
}

/// Parse a stored zone name, falling back to `default` if it is unusable.
pub fn parse_or_default(name: &str, default: Tz) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "stored timezone is not valid, using default");
            default
        }
    }
}

/// Interpret a wall-clock datetime in `tz`.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times that
/// do not exist (clocks going forward) are rejected.
pub fn local_to_utc(
    tz: Tz,
    local: NaiveDateTime,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => Ok(at.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(ValidationError::NonexistentLocalTime(
            local.format("%Y-%m-%d %H:%M").to_string(),
        )),
    }
}

/// First instant of `date` in `tz`.
///
/// Zones that skip midnight on a DST change start the day at the first
/// existing minute after it.
pub fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let mut local = date.and_time(NaiveTime::MIN);
    for _ in 0..=180 {
        if let Ok(at) = local_to_utc(tz, local) {
            return at;
        }
        local += chrono::Duration::minutes(1);
    }
    // No zone has a gap this long; treat the date as UTC.
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// UTC bounds of the local days `[first, last]`, as a half-open range.
pub fn day_range(tz: Tz, first: NaiveDate, last: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let after_last = last.checked_add_days(Days::new(1)).unwrap_or(last);
    (start_of_day(tz, first), start_of_day(tz, after_last))
}

/// Local calendar date of `at` in `tz`.
pub fn local_date(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}
