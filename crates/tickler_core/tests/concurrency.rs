//! Owner edits racing delivery on a file-backed database with a real pool.

mod common;

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use common::{RecordingNotifier, moscow, utc};
use tempfile::TempDir;
use tickler_core::{DeliveryPolicy, DueSelector, ManualClock, Scheduler, SchedulerConfig};
use tickler_db::{Cadence, NewRecurringReminder, NewReminder, RecurringChanges, TicklerDb, queries};

const ROUNDS: usize = 25;

async fn open(temp: &TempDir) -> TicklerDb {
    TicklerDb::open(temp.path().join("tickler.db")).await.unwrap()
}

async fn add_due(db: &TicklerDb, label: &str, fire_at: DateTime<Utc>) -> i64 {
    queries::add_reminder(
        db,
        &NewReminder {
            chat_id: 100,
            user_id: 1,
            fire_at,
            label: label.to_string(),
            is_todo: false,
        },
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_and_claim_never_both_win() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp).await;
    let now = utc(2024, 3, 11, 15, 0, 0);

    for round in 0..ROUNDS {
        let id = add_due(&db, &format!("round {round}"), now).await;

        let claim = tokio::spawn({
            let db = db.clone();
            async move { queries::claim_due_reminders(&db, now).await }
        });
        let delete = tokio::spawn({
            let db = db.clone();
            async move { queries::delete_reminder(&db, id, 1).await }
        });
        let claimed = claim.await.unwrap().unwrap();
        let deleted = delete.await.unwrap().unwrap();

        let delivered = claimed.iter().any(|r| r.id == id);
        assert!(
            delivered != deleted,
            "round {round}: delivered={delivered} deleted={deleted}"
        );
        assert!(queries::get_pending_reminder(db.pool(), id).await.unwrap().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reschedule_and_claim_never_both_win() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp).await;
    let now = utc(2024, 3, 11, 15, 0, 0);
    let later = utc(2024, 3, 12, 15, 0, 0);

    for round in 0..ROUNDS {
        let id = add_due(&db, &format!("round {round}"), now).await;

        let claim = tokio::spawn({
            let db = db.clone();
            async move { queries::claim_due_reminders(&db, now).await }
        });
        let update = tokio::spawn({
            let db = db.clone();
            async move { queries::update_reminder_time(&db, id, 1, later).await }
        });
        let claimed = claim.await.unwrap().unwrap();
        let moved = update.await.unwrap().unwrap();

        let delivered = claimed.iter().any(|r| r.id == id);
        assert!(delivered != moved, "round {round}: delivered={delivered} moved={moved}");
        match queries::get_pending_reminder(db.pool(), id).await.unwrap() {
            Some(pending) => {
                assert!(moved);
                assert_eq!(pending.fire_at, later);
            }
            None => assert!(delivered),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduler_tick_and_owner_delete_deliver_or_delete() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = ManualClock::new(utc(2024, 3, 11, 15, 0, 0));
    let config = SchedulerConfig {
        delivery_policy: DeliveryPolicy::AtMostOnce,
        ..SchedulerConfig::default()
    };
    let selector = DueSelector::new(db.clone(), moscow(), config.recurring_grace());
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        selector,
        notifier.clone(),
        Arc::new(clock.clone()),
        config,
    ));

    for round in 0..ROUNDS {
        notifier.clear();
        let id = add_due(&db, &format!("round {round}"), utc(2024, 3, 11, 15, 0, 0)).await;

        let tick = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.check_reminders().await }
        });
        let delete = tokio::spawn({
            let db = db.clone();
            async move { queries::delete_reminder(&db, id, 1).await }
        });
        let report = tick.await.unwrap().unwrap();
        let deleted = delete.await.unwrap().unwrap();

        let delivered = notifier.texts().len();
        assert_eq!(report.sent, delivered);
        if deleted {
            assert_eq!(delivered, 0, "round {round}: deleted reminder was delivered");
        } else {
            assert_eq!(delivered, 1, "round {round}: reminder neither deleted nor delivered");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recurring_edit_never_clobbers_a_concurrent_trigger() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp).await;
    let now = utc(2024, 3, 10, 6, 0, 0);

    for round in 0..ROUNDS {
        let id = queries::add_recurring(
            &db,
            &NewRecurringReminder {
                chat_id: 100,
                user_id: 1,
                label: format!("round {round}"),
                cadence: Cadence::Daily,
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                is_todo: false,
            },
        )
        .await
        .unwrap();
        let changes = RecurringChanges {
            label: format!("edited {round}"),
            cadence: Cadence::Daily,
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };

        let claim = tokio::spawn({
            let db = db.clone();
            async move { queries::claim_due_recurring(&db, now, move |c| c.reminder.id == id).await }
        });
        let update = tokio::spawn({
            let db = db.clone();
            async move { queries::update_recurring(&db, id, 1, &changes).await }
        });
        let claimed = claim.await.unwrap().unwrap();
        assert!(update.await.unwrap().unwrap());

        assert_eq!(claimed.len(), 1, "round {round}");
        let stored = queries::get_recurring(db.pool(), id, 1).await.unwrap().unwrap();
        assert_eq!(stored.label, format!("edited {round}"));
        assert_eq!(stored.last_triggered, Some(now));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recurring_delete_and_claim_are_serialized() {
    let temp = TempDir::new().unwrap();
    let db = open(&temp).await;
    let now = utc(2024, 3, 10, 6, 0, 0);

    for round in 0..ROUNDS {
        let id = queries::add_recurring(
            &db,
            &NewRecurringReminder {
                chat_id: 100,
                user_id: 1,
                label: format!("round {round}"),
                cadence: Cadence::Daily,
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                is_todo: false,
            },
        )
        .await
        .unwrap();

        let claim = tokio::spawn({
            let db = db.clone();
            async move { queries::claim_due_recurring(&db, now, move |c| c.reminder.id == id).await }
        });
        let delete = tokio::spawn({
            let db = db.clone();
            async move { queries::delete_recurring(&db, id, 1).await }
        });
        let claimed = claim.await.unwrap().unwrap();
        assert!(delete.await.unwrap().unwrap(), "round {round}: delete lost");

        // Either the claim saw it first, or the deactivated row was skipped.
        assert!(claimed.len() <= 1);
        assert!(queries::get_recurring(db.pool(), id, 1).await.unwrap().is_none());
        let again = queries::claim_due_recurring(&db, now, |_| true).await.unwrap();
        assert!(again.is_empty(), "round {round}: deleted definition still claimable");
    }
}
