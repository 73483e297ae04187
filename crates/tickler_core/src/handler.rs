//! Inbound message handling.
//!
//! Slash commands are answered directly. Anything else goes through the
//! intent parser under a deadline; if the parser fails or times out, the
//! user gets one generic reply and nothing is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::Days;
use chrono_tz::Tz;
use tickler_db::{TicklerDb, queries};
use tracing::{debug, error, info, warn};

use crate::capability::{IntentParser, KnownReminder, MediaKind, Notifier, ParseRequest, Transcriber};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::operation::{ListRange, Operation, ReminderRef};
use crate::reconciler::{OperationReconciler, Outcome, Requester};
use crate::reply;
use crate::timezone::{UserTimezones, local_date};

const HELP: &str = "Tell me what to remind you about and when, for example \
\"remind me to buy milk tomorrow at 18:00\" or \"yoga every Tuesday at 19:00\".\n\n\
Commands:\n\
/list - all upcoming reminders\n\
/today - today's reminders\n\
/tomorrow - tomorrow's reminders\n\
/recurring - recurring reminders\n\
/timezone - show your timezone\n\
/timezone <Zone> - set your timezone, e.g. /timezone Europe/Moscow";

/// Put in front of an edited message so the parser knows it replaces the
/// earlier one.
pub const EDITED_PREFIX: &str = "Edited: ";

/// Prefix of inline button data that deletes a reminder, e.g. `delete_12`
/// or `delete_rec_3`.
pub const DELETE_CALLBACK_PREFIX: &str = "delete_";

/// A slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Today,
    Tomorrow,
    Recurring,
    ShowTimezone,
    SetTimezone(String),
}

impl Command {
    /// Parse `text` as a command. `None` if it is not one.
    ///
    /// A `@botname` suffix on the command word is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (word, argument) = match rest.split_once(char::is_whitespace) {
            Some((word, argument)) => (word, argument.trim()),
            None => (rest, ""),
        };
        let word = word.split('@').next().unwrap_or(word).to_lowercase();

        let command = match word.as_str() {
            "start" | "help" => Self::Help,
            "list" => Self::List,
            "today" => Self::Today,
            "tomorrow" => Self::Tomorrow,
            "recurring" => Self::Recurring,
            "timezone" if argument.is_empty() => Self::ShowTimezone,
            "timezone" => Self::SetTimezone(argument.to_string()),
            _ => Self::Help,
        };
        Some(command)
    }
}

/// Handles one user message at a time; safe to share across tasks.
#[derive(Clone)]
pub struct MessageHandler {
    db: TicklerDb,
    reconciler: OperationReconciler,
    timezones: UserTimezones,
    parser: Arc<dyn IntentParser>,
    transcriber: Option<Arc<dyn Transcriber>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl MessageHandler {
    pub fn new(
        db: TicklerDb,
        default_zone: Tz,
        parser: Arc<dyn IntentParser>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        let timezones = UserTimezones::new(db.clone(), default_zone);
        let reconciler = OperationReconciler::new(db.clone(), timezones.clone(), clock.clone());
        Self {
            db,
            reconciler,
            timezones,
            parser,
            transcriber: None,
            notifier,
            clock,
            timeout,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.notifier.send(chat_id, text).await {
            error!(chat_id, "failed to send reply: {:?}", e);
        }
    }

    /// Handle a text message.
    pub async fn handle_text(&self, who: Requester, text: &str) -> Result<()> {
        match Command::parse(text) {
            Some(command) => self.handle_command(who, command).await,
            None => self.handle_intent(who, text).await,
        }
    }

    /// Handle an edited message by parsing the new text again.
    ///
    /// Earlier operations from the original text are not undone; the parser
    /// sees the prefix and the known reminders and can adjust them.
    pub async fn handle_edited_text(&self, who: Requester, text: &str) -> Result<()> {
        debug!(user_id = who.user_id, "re-parsing edited message");
        self.handle_intent(who, &format!("{EDITED_PREFIX}{text}")).await
    }

    /// Handle a voice or video message: transcribe, then treat as text.
    pub async fn handle_media(&self, who: Requester, media: &[u8], kind: MediaKind) -> Result<()> {
        let Some(transcriber) = &self.transcriber else {
            self.reply(who.chat_id, "Voice and video messages are not supported here.")
                .await;
            return Ok(());
        };

        let text = match tokio::time::timeout(self.timeout, transcriber.transcribe(media, kind)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.upstream_failed(who, e).await,
            Err(_) => {
                let e = CoreError::upstream("transcriber", "timed out");
                return self.upstream_failed(who, e).await;
            }
        };
        info!(user_id = who.user_id, ?kind, "transcribed media message");
        self.handle_intent(who, &text).await
    }

    /// Handle an inline button press carrying `data`.
    ///
    /// Only delete buttons are understood; anything else returns `None`.
    /// A miss is answered here. On success nothing is sent, so the transport
    /// can remove the button message and confirm only if that fails.
    pub async fn handle_callback(&self, who: Requester, data: &str) -> Result<Option<Outcome>> {
        let Some(target) = delete_target(data) else {
            warn!(user_id = who.user_id, data, "unknown callback data");
            return Ok(None);
        };

        let outcome = self.reconciler.apply(who, &Operation::Delete(target)).await?;
        if matches!(outcome, Outcome::NotFoundOrNotYours(_)) {
            self.reply(who.chat_id, &reply::render_outcome(&outcome)).await;
        }
        Ok(Some(outcome))
    }

    async fn upstream_failed(&self, who: Requester, e: CoreError) -> Result<()> {
        error!(user_id = who.user_id, "upstream failure: {:?}", e);
        self.reply(who.chat_id, &reply::render_failure(&e)).await;
        Ok(())
    }

    async fn handle_intent(&self, who: Requester, text: &str) -> Result<()> {
        let tz = self.timezones.timezone_of(who.user_id).await?;
        let known = self.known_reminders(who.user_id, tz).await?;
        let request = ParseRequest {
            text,
            now: self.clock.now().with_timezone(&tz),
            known: &known,
        };

        let requests = match tokio::time::timeout(self.timeout, self.parser.parse(&request)).await {
            Ok(Ok(requests)) => requests,
            Ok(Err(e)) => return self.upstream_failed(who, e).await,
            Err(_) => {
                let e = CoreError::upstream("intent parser", "timed out");
                return self.upstream_failed(who, e).await;
            }
        };

        if requests.is_empty() {
            warn!(user_id = who.user_id, "parser returned no operations");
            self.reply(
                who.chat_id,
                "I didn't find anything to do in that message. Try /help.",
            )
            .await;
            return Ok(());
        }

        for applied in self.reconciler.apply_batch(who, requests).await {
            let text = match &applied.result {
                Ok(outcome) => applied
                    .answer
                    .clone()
                    .unwrap_or_else(|| reply::render_outcome(outcome)),
                Err(e) => reply::render_failure(e),
            };
            self.reply(who.chat_id, &text).await;
        }
        Ok(())
    }

    async fn handle_command(&self, who: Requester, command: Command) -> Result<()> {
        let text = match command {
            Command::Help => HELP.to_string(),
            Command::List => self.render_list(who, ListRange::All).await,
            Command::Today | Command::Tomorrow => {
                let tz = self.timezones.timezone_of(who.user_id).await?;
                let today = local_date(tz, self.clock.now());
                let day = if command == Command::Today {
                    today
                } else {
                    today.checked_add_days(Days::new(1)).unwrap_or(today)
                };
                self.render_list(who, ListRange::Days {
                    first: day,
                    last: day,
                })
                .await
            }
            Command::Recurring => {
                match self.reconciler.apply(who, &Operation::ShowRecurring).await {
                    Ok(outcome) => reply::render_outcome(&outcome),
                    Err(e) => reply::render_failure(&e),
                }
            }
            Command::ShowTimezone => {
                let tz = self.timezones.timezone_of(who.user_id).await?;
                format!("Your timezone is {}.", tz.name())
            }
            Command::SetTimezone(name) => match self.timezones.set_timezone(who.user_id, &name).await {
                Ok(tz) => format!("Timezone set to {}.", tz.name()),
                Err(e) => {
                    warn!(user_id = who.user_id, "timezone change rejected: {}", e);
                    reply::render_failure(&e)
                }
            },
        };
        self.reply(who.chat_id, &text).await;
        Ok(())
    }

    async fn render_list(&self, who: Requester, range: ListRange) -> String {
        match self.reconciler.apply(who, &Operation::ShowList(range)).await {
            Ok(outcome) => reply::render_outcome(&outcome),
            Err(e) => {
                error!(user_id = who.user_id, "listing failed: {:?}", e);
                reply::render_failure(&e)
            }
        }
    }

    /// The user's current reminders, as ids the parser can refer back to.
    pub async fn known_reminders(&self, user_id: i64, tz: Tz) -> Result<Vec<KnownReminder>> {
        let reminders = queries::list_active_reminders(self.db.pool(), user_id).await?;
        let definitions = queries::list_active_recurring(self.db.pool(), user_id).await?;

        let mut known: Vec<KnownReminder> = reminders
            .into_iter()
            .map(|r| KnownReminder {
                reminder_id: r.id.to_string(),
                schedule: r
                    .fire_at
                    .with_timezone(&tz)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                label: r.label,
                is_todo: r.is_todo,
            })
            .collect();
        known.extend(definitions.into_iter().map(|d| KnownReminder {
            reminder_id: format!("rec_{}", d.id),
            schedule: reply::describe_recurring(&d),
            label: d.label,
            is_todo: d.is_todo,
        }));
        Ok(known)
    }
}

fn delete_target(data: &str) -> Option<ReminderRef> {
    data.strip_prefix(DELETE_CALLBACK_PREFIX)?.parse().ok()
}
