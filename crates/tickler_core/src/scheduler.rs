//! Periodic delivery of due reminders.
//!
//! Two independent loops: one sweeps one-shot reminders, the other checks
//! recurring definitions. Each tick is isolated; an error is logged and the
//! loop carries on with the next tick.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickler_db::{TicklerDb, queries};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::capability::Notifier;
use crate::clock::Clock;
use crate::due::DueSelector;
use crate::error::{CoreError, Result};
use crate::reply;

/// What happens to an item whose notification could not be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Items are marked before sending. A failed send drops the reminder;
    /// nothing is ever delivered twice.
    #[default]
    AtMostOnce,
    /// Items are marked only after a successful send. A failed send is
    /// retried on the next tick; a crash between send and mark can deliver
    /// twice.
    AtLeastOnce,
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtMostOnce => write!(f, "at_most_once"),
            Self::AtLeastOnce => write!(f, "at_least_once"),
        }
    }
}

impl FromStr for DeliveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "at_most_once" => Ok(Self::AtMostOnce),
            "at_least_once" => Ok(Self::AtLeastOnce),
            other => Err(format!("unknown delivery policy {other:?}")),
        }
    }
}

/// Configuration for the scheduler loops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between one-shot sweeps
    pub one_shot_interval_secs: u64,

    /// Seconds between recurring checks; at most 60 so no minute is skipped
    pub recurring_interval_secs: u64,

    /// How long after its time a recurring definition may still fire
    pub recurring_grace_secs: u64,

    pub delivery_policy: DeliveryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            one_shot_interval_secs: 10,
            recurring_interval_secs: 60,
            recurring_grace_secs: 60,
            delivery_policy: DeliveryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn one_shot_interval(&self) -> Duration {
        Duration::from_secs(self.one_shot_interval_secs)
    }

    pub fn recurring_interval(&self) -> Duration {
        Duration::from_secs(self.recurring_interval_secs)
    }

    pub fn recurring_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recurring_grace_secs as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.one_shot_interval_secs == 0 {
            return Err(CoreError::invalid_config(
                "config",
                "scheduler.one_shot_interval_secs",
                "a positive number of seconds",
                "interval must not be zero",
            ));
        }
        if self.recurring_interval_secs == 0 || self.recurring_interval_secs > 60 {
            return Err(CoreError::invalid_config(
                "config",
                "scheduler.recurring_interval_secs",
                "between 1 and 60 seconds",
                format!("got {}", self.recurring_interval_secs),
            ));
        }
        if self.recurring_grace_secs < 60 {
            return Err(CoreError::invalid_config(
                "config",
                "scheduler.recurring_grace_secs",
                "at least 60 seconds",
                format!("got {}", self.recurring_grace_secs),
            ));
        }
        Ok(())
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sent == 0 && self.failed == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Check {
    OneShot,
    Recurring,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneShot => write!(f, "one-shot"),
            Self::Recurring => write!(f, "recurring"),
        }
    }
}

/// Drives delivery of due reminders
pub struct Scheduler {
    db: TicklerDb,
    selector: DueSelector,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        db: TicklerDb,
        selector: DueSelector,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            selector,
            notifier,
            clock,
            config,
        }
    }

    /// Start both loops in the background.
    ///
    /// Cancelling `shutdown` stops each loop at its next wait; a tick that is
    /// already running finishes first.
    pub fn start(self, shutdown: CancellationToken) -> SchedulerHandle {
        let scheduler = Arc::new(self);

        let one_shot = tokio::spawn({
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run(Check::OneShot, shutdown).await }
        });
        let recurring = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(Check::Recurring, shutdown).await }
        });

        SchedulerHandle {
            one_shot,
            recurring,
        }
    }

    async fn run(&self, check: Check, shutdown: CancellationToken) {
        let period = match check {
            Check::OneShot => self.config.one_shot_interval(),
            Check::Recurring => self.config.recurring_interval(),
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{} reminder check started, every {:?}", check, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let result = match check {
                Check::OneShot => self.check_reminders().await,
                Check::Recurring => self.check_recurring().await,
            };
            match result {
                Ok(report) if !report.is_empty() => {
                    info!(sent = report.sent, failed = report.failed, "{} tick delivered", check)
                }
                Ok(_) => debug!("{} tick: nothing due", check),
                Err(e) => error!("{} reminder check failed: {:?}", check, e),
            }
        }

        info!("{} reminder check stopped", check);
    }

    async fn deliver(&self, chat_id: i64, text: &str) -> bool {
        match self.notifier.send(chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                error!(chat_id, "failed to send reminder: {:?}", e);
                false
            }
        }
    }

    /// One sweep of one-shot reminders.
    pub async fn check_reminders(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        match self.config.delivery_policy {
            DeliveryPolicy::AtMostOnce => {
                for reminder in self.selector.claim_reminders(now).await? {
                    let delivered = self
                        .deliver(reminder.chat_id, &reply::reminder_notification(&reminder))
                        .await;
                    report.record(delivered);
                }
            }
            DeliveryPolicy::AtLeastOnce => {
                let mut delivered_ids = Vec::new();
                for due in self.selector.due_reminders(now).await? {
                    // The owner may have deleted or edited it since the select.
                    let reminder = match queries::get_pending_reminder(self.db.pool(), due.id).await {
                        Ok(Some(reminder)) => reminder,
                        Ok(None) => {
                            debug!(reminder_id = due.id, "reminder gone before delivery");
                            continue;
                        }
                        Err(e) => {
                            error!(reminder_id = due.id, "failed to re-check reminder: {:?}", e);
                            continue;
                        }
                    };
                    let delivered = self
                        .deliver(reminder.chat_id, &reply::reminder_notification(&reminder))
                        .await;
                    if delivered {
                        delivered_ids.push(reminder.id);
                    }
                    report.record(delivered);
                }
                queries::mark_delivered_reminders(&self.db, &delivered_ids).await?;
            }
        }

        Ok(report)
    }

    /// One check of recurring definitions.
    pub async fn check_recurring(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        match self.config.delivery_policy {
            DeliveryPolicy::AtMostOnce => {
                for due in self.selector.claim_recurring(now).await? {
                    let text = reply::recurring_notification(&due.reminder);
                    let delivered = self.deliver(due.reminder.chat_id, &text).await;
                    report.record(delivered);
                }
            }
            DeliveryPolicy::AtLeastOnce => {
                for due in self.selector.due_recurring(now).await? {
                    let id = due.reminder.id;
                    let definition = match queries::get_recurring(self.db.pool(), id, due.reminder.user_id).await {
                        Ok(Some(definition)) => definition,
                        Ok(None) => {
                            debug!(recurring_id = id, "recurring reminder gone before delivery");
                            continue;
                        }
                        Err(e) => {
                            error!(recurring_id = id, "failed to re-check recurring reminder: {:?}", e);
                            continue;
                        }
                    };
                    let text = reply::recurring_notification(&definition);
                    let delivered = self.deliver(definition.chat_id, &text).await;
                    if delivered {
                        if let Err(e) = queries::mark_recurring_triggered(&self.db, id, now).await {
                            error!(recurring_id = id, "failed to record trigger: {:?}", e);
                        }
                    }
                    report.record(delivered);
                }
            }
        }

        Ok(report)
    }
}

/// Join handles of the two scheduler loops
pub struct SchedulerHandle {
    one_shot: JoinHandle<()>,
    recurring: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        let (one_shot, recurring) = tokio::join!(self.one_shot, self.recurring);
        for result in [one_shot, recurring] {
            if let Err(e) = result {
                error!("scheduler task ended abnormally: {:?}", e);
            }
        }
    }
}
