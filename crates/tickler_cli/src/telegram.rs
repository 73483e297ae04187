//! Telegram Bot API transport: outbound messages and inbound long polling.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tickler_core::capability::Notifier;
use tickler_core::{CoreError, MediaKind, MessageHandler, Outcome, Requester, Result, reply};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const API_BASE: &str = "https://api.telegram.org";

/// Longest text a single `sendMessage` accepts, in characters.
pub const MESSAGE_LIMIT: usize = 4096;

/// Seconds Telegram holds a `getUpdates` call open.
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Update kinds requested from `getUpdates`.
const ALLOWED_UPDATES: [&str; 3] = ["message", "edited_message", "callback_query"];

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub voice: Option<MediaFile>,
    pub video: Option<MediaFile>,
    pub video_note: Option<MediaFile>,
}

/// An inline button press.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// Message the button was attached to; absent when it is too old
    pub message: Option<ButtonMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonMessage {
    pub message_id: i64,
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

/// Any downloadable attachment; only the id matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

/// Thin client over the Bot API methods the bot uses.
#[derive(Debug, Clone)]
pub struct TelegramApi {
    http: reqwest::Client,
    token: String,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            // Long enough for a held getUpdates call.
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .map_err(|e| CoreError::upstream("telegram", e))?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{API_BASE}/bot{}/{method}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::upstream("telegram", e.without_url()))?;

        let reply: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| CoreError::upstream("telegram", e.without_url()))?;
        match (reply.ok, reply.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(CoreError::upstream(
                "telegram",
                format!(
                    "{method} failed: {}",
                    reply.description.unwrap_or_else(|| "no description".to_string())
                ),
            )),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MESSAGE_LIMIT) {
            self.call::<serde_json::Value>(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": chunk }),
            )
            .await
            .map_err(|e| CoreError::notify(chat_id, e))?;
        }
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ALLOWED_UPDATES,
            }),
        )
        .await
    }

    /// Stop the client-side spinner on a pressed button.
    pub async fn answer_callback_query(&self, query_id: &str) -> Result<()> {
        self.call::<bool>("answerCallbackQuery", json!({ "callback_query_id": query_id }))
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.call::<bool>(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    /// Download a file by id, e.g. a voice note.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: File = self.call("getFile", json!({ "file_id": file_id })).await?;
        let path = file
            .file_path
            .ok_or_else(|| CoreError::upstream("telegram", "file has no download path"))?;

        let bytes = self
            .http
            .get(format!("{API_BASE}/file/bot{}/{path}", self.token))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::upstream("telegram", e.without_url()))?
            .bytes()
            .await
            .map_err(|e| CoreError::upstream("telegram", e.without_url()))?;
        Ok(bytes.to_vec())
    }
}

/// Split `text` into pieces of at most `limit` characters, preferring line
/// breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let mut line = line;
        loop {
            let line_len = line.chars().count();
            if current_len + line_len <= limit {
                current.push_str(line);
                current_len += line_len;
                break;
            }
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // A single line longer than the limit.
            let split_at = line
                .char_indices()
                .nth(limit)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            chunks.push(line[..split_at].to_string());
            line = &line[split_at..];
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// [`Notifier`] that posts to Telegram chats.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    api: TelegramApi,
}

impl TelegramNotifier {
    pub fn new(api: TelegramApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.api.send_message(chat_id, text).await?;
        debug!(chat_id, "message sent");
        Ok(())
    }
}

/// Feed incoming messages to `handler` until `shutdown` fires.
pub async fn poll_updates(api: TelegramApi, handler: MessageHandler, shutdown: CancellationToken) {
    let mut offset = 0;
    info!("listening for Telegram messages");

    loop {
        let updates = tokio::select! {
            _ = shutdown.cancelled() => break,
            updates = api.get_updates(offset) => updates,
        };
        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                error!("polling Telegram failed: {:?}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(inbound) = Inbound::route(update) else {
                continue;
            };

            let handler = handler.clone();
            let api = api.clone();
            tokio::spawn(async move {
                let chat_id = inbound.who().chat_id;
                if let Err(e) = dispatch(&api, &handler, inbound).await {
                    error!(chat_id, "failed to handle update: {:?}", e);
                }
            });
        }
    }

    info!("stopped listening for Telegram messages");
}

/// What an update asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inbound {
    Text { who: Requester, text: String },
    Edited { who: Requester, text: String },
    Media { who: Requester, file_id: String, kind: MediaKind },
    Button {
        who: Requester,
        query_id: String,
        message_id: Option<i64>,
        data: String,
    },
    Unsupported { who: Requester },
}

impl Inbound {
    /// `None` for updates with no sender or nothing the bot reacts to.
    fn route(update: Update) -> Option<Self> {
        if let Some(message) = update.message {
            let who = sender(&message)?;
            if let Some(text) = message.text {
                return Some(Self::Text { who, text });
            }
            let media = [
                (message.voice, MediaKind::Voice),
                (message.video, MediaKind::Video),
                (message.video_note, MediaKind::Video),
            ]
            .into_iter()
            .find_map(|(file, kind)| file.map(|file| (file, kind)));
            return Some(match media {
                Some((file, kind)) => Self::Media {
                    who,
                    file_id: file.file_id,
                    kind,
                },
                None => Self::Unsupported { who },
            });
        }

        if let Some(message) = update.edited_message {
            let who = sender(&message)?;
            let text = message.text?;
            return Some(Self::Edited { who, text });
        }

        let query = update.callback_query?;
        let chat_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        Some(Self::Button {
            who: Requester {
                chat_id,
                user_id: query.from.id,
            },
            message_id: query.message.map(|m| m.message_id),
            query_id: query.id,
            data: query.data.unwrap_or_default(),
        })
    }

    fn who(&self) -> Requester {
        match self {
            Self::Text { who, .. }
            | Self::Edited { who, .. }
            | Self::Media { who, .. }
            | Self::Button { who, .. }
            | Self::Unsupported { who } => *who,
        }
    }
}

fn sender(message: &Message) -> Option<Requester> {
    let from = message.from.as_ref()?;
    Some(Requester {
        chat_id: message.chat.id,
        user_id: from.id,
    })
}

async fn dispatch(api: &TelegramApi, handler: &MessageHandler, inbound: Inbound) -> Result<()> {
    match inbound {
        Inbound::Text { who, text } => handler.handle_text(who, &text).await,
        Inbound::Edited { who, text } => handler.handle_edited_text(who, &text).await,
        Inbound::Media { who, file_id, kind } => {
            let media = api.download(&file_id).await?;
            handler.handle_media(who, &media, kind).await
        }
        Inbound::Button {
            who,
            query_id,
            message_id,
            data,
        } => {
            if let Err(e) = api.answer_callback_query(&query_id).await {
                warn!(chat_id = who.chat_id, "failed to answer button press: {:?}", e);
            }
            let Some(outcome @ Outcome::Deleted(_)) = handler.handle_callback(who, &data).await?
            else {
                return Ok(());
            };
            // Removing the message with the button is the confirmation.
            let removed = match message_id {
                Some(message_id) => api.delete_message(who.chat_id, message_id).await,
                None => Err(CoreError::upstream("telegram", "button message unavailable")),
            };
            if let Err(e) = removed {
                debug!(chat_id = who.chat_id, "could not remove button message: {:?}", e);
                api.send_message(who.chat_id, &reply::render_outcome(&outcome))
                    .await?;
            }
            Ok(())
        }
        Inbound::Unsupported { who } => {
            warn!(chat_id = who.chat_id, "ignoring message without text, voice or video");
            Ok(())
        }
    }
}
