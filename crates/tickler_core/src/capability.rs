//! Capabilities the engine consumes but does not implement itself.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::operation::OperationRequest;

/// Delivers text to a chat.
///
/// The scheduler logs failures and moves on; it never retries a send.
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// A reminder the user already has, as shown to the intent parser so it can
/// refer to existing items by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownReminder {
    /// Plain integer for one-shot reminders, `rec_<id>` for recurring ones
    pub reminder_id: String,
    pub label: String,
    /// Local fire time, or the recurrence description
    pub schedule: String,
    pub is_todo: bool,
}

/// Everything the parser gets to see for one message.
#[derive(Debug, Clone)]
pub struct ParseRequest<'a> {
    pub text: &'a str,
    /// Current time in the user's zone
    pub now: DateTime<Tz>,
    pub known: &'a [KnownReminder],
}

/// Turns free text into operation requests.
///
/// Failures are opaque to the user. Implementations should put provider
/// detail in the error for logs only.
#[async_trait]
pub trait IntentParser: Send + Sync + Debug {
    async fn parse(&self, request: &ParseRequest<'_>) -> Result<Vec<OperationRequest>>;
}

/// Recorded media a user can send instead of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Voice note, Ogg/Opus
    Voice,
    /// Video or round video note, MP4
    Video,
}

impl MediaKind {
    /// File name to upload the bytes under.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Voice => "voice.ogg",
            Self::Video => "video.mp4",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Voice => "audio/ogg",
            Self::Video => "video/mp4",
        }
    }
}

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync + Debug {
    async fn transcribe(&self, media: &[u8], kind: MediaKind) -> Result<String>;
}
