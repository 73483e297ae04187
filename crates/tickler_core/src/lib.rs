//! Tickler Core - reminder scheduling and conversation engine
//!
//! Turns chat messages into reminder operations, applies them to storage,
//! and delivers due reminders. Storage lives in `tickler_db`; chat delivery,
//! intent parsing and transcription are supplied through the traits in
//! [`capability`].

pub mod agenda;
pub mod capability;
pub mod clock;
pub mod config;
pub mod due;
pub mod error;
pub mod handler;
pub mod llm;
pub mod operation;
pub mod projector;
pub mod reconciler;
pub mod reply;
pub mod scheduler;
pub mod timezone;

pub use agenda::{Agenda, AgendaDay, AgendaEntry, EntrySource};
pub use capability::{IntentParser, KnownReminder, MediaKind, Notifier, ParseRequest, Transcriber};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TicklerConfig;
pub use due::{DueRecurring, DueSelector, is_recurring_due};
pub use error::{ConfigError, CoreError, Result, ValidationError};
pub use handler::{Command, EDITED_PREFIX, MessageHandler};
pub use llm::{OpenAiIntentParser, OpenAiTranscriber, PromptConfig};
pub use operation::{Action, ListRange, Operation, OperationRequest, RecurringPatch, ReminderRef};
pub use projector::{Occurrence, project};
pub use reconciler::{Applied, OperationReconciler, Outcome, Requester};
pub use scheduler::{DeliveryPolicy, Scheduler, SchedulerConfig, SchedulerHandle, TickReport};
pub use timezone::UserTimezones;
