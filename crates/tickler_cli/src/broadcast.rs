//! Operator broadcast to one chat or to every known chat.

use std::io::Read;

use miette::{IntoDiagnostic, Result, miette};
use tickler_core::capability::Notifier;
use tickler_db::{TicklerDb, queries};
use tracing::{error, info};

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Chat(i64),
}

impl Audience {
    pub fn from_flags(all: bool, chat: Option<i64>) -> Result<Self> {
        match (all, chat) {
            (true, None) => Ok(Self::All),
            (false, Some(chat_id)) => Ok(Self::Chat(chat_id)),
            (true, Some(_)) => Err(miette!("use either --all or --chat, not both")),
            (false, None) => Err(miette!("no recipients: pass --all or --chat <id>")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// The message text: `--message` if given, else stdin. Blank is an error.
pub fn resolve_message(flag: Option<String>, stdin: impl Read) -> Result<String> {
    let raw = match flag {
        Some(message) => message,
        None => {
            let mut buffer = String::new();
            let mut stdin = stdin;
            stdin.read_to_string(&mut buffer).into_diagnostic()?;
            buffer
        }
    };
    let message = raw.trim();
    if message.is_empty() {
        return Err(miette!("refusing to broadcast an empty message"));
    }
    Ok(message.to_string())
}

pub async fn recipients(db: &TicklerDb, audience: Audience) -> Result<Vec<i64>> {
    match audience {
        Audience::Chat(chat_id) => Ok(vec![chat_id]),
        Audience::All => Ok(queries::active_chat_ids(db.pool()).await?),
    }
}

/// Send `message` to every chat in `chat_ids`, counting outcomes.
pub async fn broadcast(notifier: &dyn Notifier, chat_ids: &[i64], message: &str) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for &chat_id in chat_ids {
        match notifier.send(chat_id, message).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                error!(chat_id, "broadcast delivery failed: {:?}", e);
                report.failed += 1;
            }
        }
    }
    info!(
        sent = report.sent,
        failed = report.failed,
        "broadcast finished"
    );
    report
}
