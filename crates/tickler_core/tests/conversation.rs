//! Chat messages through the handler and reconciler down to storage.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use common::{CannedTranscriber, RecordingNotifier, ScriptedParser, SlowParser, moscow, op, utc};
use pretty_assertions::assert_eq;
use tickler_core::capability::IntentParser;
use tickler_core::timezone::UserTimezones;
use tickler_core::{
    EDITED_PREFIX, ManualClock, MediaKind, MessageHandler, OperationReconciler, Outcome, ReminderRef,
    Requester,
};
use tickler_db::{Cadence, TicklerDb, queries};

const ALICE: Requester = Requester {
    chat_id: 100,
    user_id: 1,
};
const BOB: Requester = Requester {
    chat_id: 200,
    user_id: 2,
};

struct Harness {
    db: TicklerDb,
    notifier: Arc<RecordingNotifier>,
    clock: ManualClock,
    handler: MessageHandler,
}

async fn harness(parser: Arc<dyn IntentParser>) -> Harness {
    let db = TicklerDb::open_in_memory().await.unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    // Sunday 2024-03-10, 15:00 Moscow
    let clock = ManualClock::new(utc(2024, 3, 10, 12, 0, 0));
    let handler = MessageHandler::new(
        db.clone(),
        moscow(),
        parser,
        notifier.clone(),
        Arc::new(clock.clone()),
        Duration::from_millis(200),
    );
    Harness {
        db,
        notifier,
        clock,
        handler,
    }
}

#[tokio::test]
async fn create_stores_the_local_time_in_utc() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![op(
        r#"{"action": "create", "label": "buy milk", "datetime": "2024-03-11 18:00:00"}"#,
    )]]));
    let h = harness(parser.clone()).await;

    h.handler
        .handle_text(ALICE, "remind me to buy milk tomorrow at 18:00")
        .await
        .unwrap();

    let stored = queries::list_active_reminders(h.db.pool(), ALICE.user_id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].fire_at, utc(2024, 3, 11, 15, 0, 0));
    assert_eq!(stored[0].chat_id, ALICE.chat_id);
    assert_eq!(
        h.notifier.sent(),
        vec![(100, "Reminder set: buy milk at 11.03.2024 18:00".to_string())]
    );
    assert_eq!(
        parser.seen.lock().unwrap().clone(),
        vec!["remind me to buy milk tomorrow at 18:00".to_string()]
    );
}

#[tokio::test]
async fn parser_answer_replaces_default_confirmation() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![op(
        r#"{"action": "create", "label": "dentist", "datetime": "2024-03-15 10:00", "answer": "Got it, dentist on Friday."}"#,
    )]]));
    let h = harness(parser).await;

    h.handler.handle_text(ALICE, "dentist friday 10").await.unwrap();
    assert_eq!(h.notifier.texts(), vec!["Got it, dentist on Friday.".to_string()]);
}

#[tokio::test]
async fn parser_timeout_writes_nothing() {
    let h = harness(Arc::new(SlowParser(Duration::from_secs(30)))).await;

    h.handler
        .handle_text(ALICE, "remind me about something")
        .await
        .unwrap();

    assert_eq!(
        h.notifier.texts(),
        vec!["Sorry, I couldn't understand that. Please try rephrasing.".to_string()]
    );
    assert!(
        queries::list_active_reminders(h.db.pool(), ALICE.user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn parser_error_gets_one_generic_reply() {
    // An empty script fails on first use.
    let h = harness(Arc::new(ScriptedParser::default())).await;
    h.handler.handle_text(ALICE, "blah").await.unwrap();
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn batch_operations_are_independent() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![
        op(r#"{"action": "create", "label": "a", "datetime": "2024-03-11 09:00:00"}"#),
        op(r#"{"action": "create", "label": "b", "datetime": "tomorrow morning"}"#),
        op(r#"{"action": "delete", "reminder_id": "999"}"#),
        op(r#"{"action": "fly_to_moon"}"#),
        op(r#"{"action": "create", "label": "c", "datetime": "2024-03-12 09:00:00"}"#),
    ]]));
    let h = harness(parser).await;

    h.handler.handle_text(ALICE, "several things").await.unwrap();

    let texts = h.notifier.texts();
    assert_eq!(texts.len(), 5);
    assert_eq!(texts[0], "Reminder set: a at 11.03.2024 09:00");
    assert!(texts[1].starts_with("Invalid format:"));
    assert_eq!(texts[2], "Reminder not found or it does not belong to you.");
    assert_eq!(texts[3], "Sorry, I don't know how to do that.");
    assert_eq!(texts[4], "Reminder set: c at 12.03.2024 09:00");

    let labels: Vec<String> = queries::list_active_reminders(h.db.pool(), ALICE.user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.label)
        .collect();
    assert_eq!(labels, vec!["a".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn empty_parse_result_is_reported() {
    let h = harness(Arc::new(ScriptedParser::new(vec![vec![]]))).await;
    h.handler.handle_text(ALICE, "hello there").await.unwrap();
    assert_eq!(
        h.notifier.texts(),
        vec!["I didn't find anything to do in that message. Try /help.".to_string()]
    );
}

#[tokio::test]
async fn other_users_reminders_are_untouchable() {
    let db = TicklerDb::open_in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(utc(2024, 3, 10, 12, 0, 0)));
    let reconciler =
        OperationReconciler::new(db.clone(), UserTimezones::new(db.clone(), moscow()), clock);

    let created = reconciler
        .apply_request(
            ALICE,
            op(r#"{"action": "create", "label": "secret", "datetime": "2024-03-11 10:00:00"}"#),
        )
        .await
        .unwrap();
    let Outcome::Created { id, .. } = created else {
        panic!("unexpected outcome {created:?}");
    };

    let attempts = [
        format!(r#"{{"action": "delete", "reminder_id": "{id}"}}"#),
        format!(r#"{{"action": "adjust", "reminder_id": "{id}", "label": "mine now"}}"#),
    ];
    for attempt in attempts {
        let outcome = reconciler.apply_request(BOB, op(&attempt)).await.unwrap();
        assert_eq!(outcome, Outcome::NotFoundOrNotYours(ReminderRef::OneShot(id)));
    }

    let alice = queries::list_active_reminders(db.pool(), ALICE.user_id)
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].label, "secret");
    assert!(
        queries::list_active_reminders(db.pool(), BOB.user_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn adjusting_recurring_time_keeps_cadence_and_label() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![op(
        r#"{"action": "create_recurring", "label": "yoga", "recurring_type": "weekly", "day_of_week": 2, "time": "19:00"}"#,
    )]]));
    let h = harness(parser.clone()).await;
    h.handler.handle_text(ALICE, "yoga every tuesday 19:00").await.unwrap();

    let definitions = queries::list_active_recurring(h.db.pool(), ALICE.user_id)
        .await
        .unwrap();
    assert_eq!(definitions.len(), 1);
    let id = definitions[0].id;

    parser.push(vec![op(&format!(
        r#"{{"action": "adjust", "reminder_id": "rec_{id}", "time": "20:00"}}"#
    ))]);
    h.handler.handle_text(ALICE, "move yoga to 20:00").await.unwrap();

    let updated = queries::get_recurring(h.db.pool(), id, ALICE.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.label, "yoga");
    assert_eq!(
        updated.cadence,
        Cadence::Weekly {
            day_of_week: Weekday::Tue
        }
    );
    assert_eq!(updated.time, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
    assert_eq!(
        h.notifier.texts(),
        vec![
            "Recurring reminder set: yoga, every Tuesday at 19:00".to_string(),
            "Recurring reminder updated.".to_string(),
        ]
    );
}

#[tokio::test]
async fn today_merges_one_shots_and_recurring_occurrences() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![
        op(r#"{"action": "create_recurring", "label": "yoga", "recurring_type": "weekly", "day_of_week": "tuesday", "time": "19:00"}"#),
        op(r#"{"action": "create", "label": "dentist", "datetime": "2024-03-12 10:30:00"}"#),
        op(r#"{"action": "create", "label": "buy bread", "datetime": "2024-03-12 00:00:00", "is_todo": true}"#),
        op(r#"{"action": "create", "label": "not today", "datetime": "2024-03-13 10:30:00"}"#),
    ]]));
    let h = harness(parser).await;
    h.handler.handle_text(ALICE, "set things up").await.unwrap();
    h.notifier.clear();

    // Tuesday 2024-03-12, 08:00 Moscow
    h.clock.set(utc(2024, 3, 12, 5, 0, 0));
    h.handler.handle_text(ALICE, "/today").await.unwrap();

    assert_eq!(
        h.notifier.texts(),
        vec![
            "Today, 12.03.2024\n  ☐ buy bread\n  10:30 dentist\n  19:00 yoga (regular)"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn date_range_list_spans_days_and_stops_at_end_date_midnight() {
    let parser = Arc::new(ScriptedParser::new(vec![
        vec![
            op(r#"{"action": "create_recurring", "label": "yoga", "recurring_type": "weekly", "day_of_week": "tuesday", "time": "19:00"}"#),
            op(r#"{"action": "create", "label": "dentist", "datetime": "2024-03-11 10:30:00"}"#),
            op(r#"{"action": "create", "label": "late night", "datetime": "2024-03-13 23:59:00"}"#),
            op(r#"{"action": "create", "label": "after the range", "datetime": "2024-03-14 00:00:00"}"#),
            op(r#"{"action": "create", "label": "before the range", "datetime": "2024-03-10 23:59:00"}"#),
        ],
        vec![op(
            r#"{"action": "show_list", "start_date": "2024-03-11", "end_date": "2024-03-13"}"#,
        )],
    ]));
    let h = harness(parser).await;
    h.handler.handle_text(ALICE, "set things up").await.unwrap();
    h.notifier.clear();

    h.handler
        .handle_text(ALICE, "what do I have monday to wednesday")
        .await
        .unwrap();

    assert_eq!(
        h.notifier.texts(),
        vec![
            "Tomorrow, 11.03.2024\n  10:30 dentist\n\n\
             Tuesday, 12.03.2024\n  19:00 yoga (regular)\n\n\
             Wednesday, 13.03.2024\n  23:59 late night"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn listing_an_empty_day() {
    let h = harness(Arc::new(ScriptedParser::default())).await;
    h.handler.handle_text(ALICE, "/tomorrow").await.unwrap();
    assert_eq!(
        h.notifier.texts(),
        vec!["You have no reminders for this period.".to_string()]
    );
}

#[tokio::test]
async fn timezone_command_round_trip() {
    let h = harness(Arc::new(ScriptedParser::default())).await;

    h.handler.handle_text(ALICE, "/timezone").await.unwrap();
    h.handler.handle_text(ALICE, "/timezone Mars/Olympus").await.unwrap();
    h.handler.handle_text(ALICE, "/timezone Asia/Tokyo").await.unwrap();

    let texts = h.notifier.texts();
    assert_eq!(texts[0], "Your timezone is Europe/Moscow.");
    assert!(texts[1].starts_with("Unknown timezone"));
    assert_eq!(texts[2], "Timezone set to Asia/Tokyo.");
    assert_eq!(
        queries::get_timezone(&h.db, ALICE.user_id, "Europe/Moscow")
            .await
            .unwrap(),
        "Asia/Tokyo"
    );
}

#[tokio::test]
async fn parser_sees_known_reminders_with_prefixed_recurring_ids() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![
        op(r#"{"action": "create", "label": "dentist", "datetime": "2024-03-12 10:30:00"}"#),
        op(r#"{"action": "create_recurring", "label": "standup", "recurring_type": "daily", "time": "10:00"}"#),
    ]]));
    let h = harness(parser).await;
    h.handler.handle_text(ALICE, "set up").await.unwrap();

    let known = h.handler.known_reminders(ALICE.user_id, moscow()).await.unwrap();
    let ids: Vec<&str> = known.iter().map(|k| k.reminder_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids[0].starts_with("rec_"));
    assert!(ids[1].starts_with("rec_"));
    assert_eq!(known[0].schedule, "2024-03-12 10:30:00");
    assert_eq!(known[1].schedule, "every day at 10:00");
}

#[tokio::test]
async fn edited_message_is_parsed_again_with_a_marker() {
    let parser = Arc::new(ScriptedParser::new(vec![
        vec![op(r#"{"action": "create", "label": "dentist", "datetime": "2024-03-11 10:00:00"}"#)],
    ]));
    let h = harness(parser.clone()).await;
    h.handler
        .handle_text(ALICE, "dentist tomorrow at 10")
        .await
        .unwrap();
    let id = queries::list_active_reminders(h.db.pool(), ALICE.user_id)
        .await
        .unwrap()[0]
        .id;

    parser.push(vec![op(&format!(
        r#"{{"action": "adjust", "reminder_id": "{id}", "datetime": "2024-03-11 11:00:00"}}"#
    ))]);
    h.handler
        .handle_edited_text(ALICE, "dentist tomorrow at 11")
        .await
        .unwrap();

    let seen = parser.seen.lock().unwrap().clone();
    assert_eq!(seen[1], format!("{EDITED_PREFIX}dentist tomorrow at 11"));
    let reminders = queries::list_active_reminders(h.db.pool(), ALICE.user_id)
        .await
        .unwrap();
    assert_eq!(reminders.len(), 1);
    // 11:00 Moscow
    assert_eq!(reminders[0].fire_at, utc(2024, 3, 11, 8, 0, 0));
}

#[tokio::test]
async fn video_note_is_transcribed_then_parsed() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![op(
        r#"{"action": "create", "label": "call grandma", "datetime": "2024-03-11 18:00:00"}"#,
    )]]));
    let transcriber = Arc::new(CannedTranscriber::new("call grandma tomorrow at six pm"));
    let h = harness(parser.clone()).await;
    let handler = h.handler.clone().with_transcriber(transcriber.clone());

    handler
        .handle_media(ALICE, b"\x00\x00\x00\x18ftypmp42", MediaKind::Video)
        .await
        .unwrap();

    assert_eq!(*transcriber.kinds.lock().unwrap(), vec![MediaKind::Video]);
    assert_eq!(
        *parser.seen.lock().unwrap(),
        vec!["call grandma tomorrow at six pm".to_string()]
    );
    assert_eq!(
        queries::list_active_reminders(h.db.pool(), ALICE.user_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn media_without_a_transcriber_is_declined() {
    let parser = Arc::new(ScriptedParser::default());
    let h = harness(parser.clone()).await;

    h.handler
        .handle_media(ALICE, b"OggS", MediaKind::Voice)
        .await
        .unwrap();

    assert!(parser.seen.lock().unwrap().is_empty());
    assert_eq!(
        h.notifier.texts(),
        vec!["Voice and video messages are not supported here.".to_string()]
    );
}

#[tokio::test]
async fn delete_buttons_are_owner_scoped() {
    let parser = Arc::new(ScriptedParser::new(vec![vec![
        op(r#"{"action": "create", "label": "dentist", "datetime": "2024-03-11 10:00:00"}"#),
        op(r#"{"action": "create_recurring", "label": "standup", "recurring_type": "daily", "time": "10:00"}"#),
    ]]));
    let h = harness(parser).await;
    h.handler.handle_text(ALICE, "set up").await.unwrap();
    h.notifier.clear();
    let one_shot = queries::list_active_reminders(h.db.pool(), ALICE.user_id)
        .await
        .unwrap()[0]
        .id;
    let recurring = queries::list_active_recurring(h.db.pool(), ALICE.user_id)
        .await
        .unwrap()[0]
        .id;

    let outcome = h
        .handler
        .handle_callback(BOB, &format!("delete_{one_shot}"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Some(Outcome::NotFoundOrNotYours(ReminderRef::OneShot(one_shot)))
    );
    assert_eq!(
        h.notifier.sent(),
        vec![(
            BOB.chat_id,
            "Reminder not found or it does not belong to you.".to_string()
        )]
    );
    h.notifier.clear();

    let outcome = h
        .handler
        .handle_callback(ALICE, &format!("delete_rec_{recurring}"))
        .await
        .unwrap();
    assert_eq!(outcome, Some(Outcome::Deleted(ReminderRef::Recurring(recurring))));
    let outcome = h
        .handler
        .handle_callback(ALICE, &format!("delete_{one_shot}"))
        .await
        .unwrap();
    assert_eq!(outcome, Some(Outcome::Deleted(ReminderRef::OneShot(one_shot))));
    // The transport confirms by removing the button message.
    assert!(h.notifier.texts().is_empty());

    assert_eq!(h.handler.handle_callback(ALICE, "snooze_1").await.unwrap(), None);
    assert!(
        queries::list_active_reminders(h.db.pool(), ALICE.user_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        queries::list_active_recurring(h.db.pool(), ALICE.user_id)
            .await
            .unwrap()
            .is_empty()
    );
}
