//! Intent parsing and speech-to-text through an OpenAI-compatible API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{IntentParser, MediaKind, ParseRequest, Transcriber};
use crate::config::TicklerConfig;
use crate::error::{CoreError, Result};
use crate::operation::OperationRequest;

/// Instructions sent as the system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You manage personal reminders. Read the user's message and answer with a JSON object {"operations": [...]}.
Each operation has an "action" and the fields it needs:
- "create": "label", "datetime" ("YYYY-MM-DD HH:MM:SS", user's local time), optional "is_todo" (true for todo items without an exact alarm).
- "create_recurring": "label", "recurring_type" ("daily", "weekly" or "monthly"), "time" ("HH:MM"), "day_of_week" (0-6, 0 = Sunday) for weekly, "day_of_month" (1-31) for monthly.
- "adjust": "reminder_id" from the known reminders, plus the fields to change ("datetime"/"label" for plain ids, "time"/"label"/"recurring_type"/"day_of_week"/"day_of_month" for "rec_" ids).
- "delete": "reminder_id".
- "show_list": optional "start_date" and "end_date" ("YYYY-MM-DD"), both inclusive.
- "show_recurring": no fields.
Any operation may carry "answer", a short reply to show the user instead of the default confirmation.
Resolve relative dates ("tomorrow", "next Friday") against the current time given below. Never invent reminder ids."#;

/// Immutable parser settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
}

impl PromptConfig {
    /// Build from the loaded configuration. Fails if no API key is set.
    pub fn from_config(config: &TicklerConfig) -> Result<Self> {
        let api_key = config.require_llm_key()?.to_string();
        Ok(Self {
            base_url: config.llm.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.llm.model.clone(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParsedOperations {
    #[serde(default)]
    operations: Vec<OperationRequest>,
}

/// Extract operation requests from a model reply.
///
/// Accepts a bare object, a bare array, or either wrapped in a Markdown code
/// fence.
pub fn parse_operations(content: &str) -> Result<Vec<OperationRequest>> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if body.starts_with('[') {
        return serde_json::from_str(body)
            .map_err(|e| CoreError::upstream("intent parser", format!("bad operations array: {e}")));
    }
    let parsed: ParsedOperations = serde_json::from_str(body)
        .map_err(|e| CoreError::upstream("intent parser", format!("bad operations object: {e}")))?;
    Ok(parsed.operations)
}

fn context_message(request: &ParseRequest<'_>) -> Result<String> {
    let known = serde_json::to_string(request.known)
        .map_err(|e| CoreError::upstream("intent parser", e))?;
    Ok(format!(
        "Current time: {} ({}, {}).\nKnown reminders: {}",
        request.now.format("%Y-%m-%d %H:%M:%S"),
        request.now.format("%A"),
        request.now.timezone().name(),
        known
    ))
}

/// [`IntentParser`] backed by a chat completion API.
#[derive(Debug, Clone)]
pub struct OpenAiIntentParser {
    http: reqwest::Client,
    config: PromptConfig,
}

impl OpenAiIntentParser {
    pub fn new(config: PromptConfig, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::upstream("intent parser", e))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl IntentParser for OpenAiIntentParser {
    async fn parse(&self, request: &ParseRequest<'_>) -> Result<Vec<OperationRequest>> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.config.system_prompt.clone(),
                },
                ChatMessage {
                    role: "system",
                    content: context_message(request)?,
                },
                ChatMessage {
                    role: "user",
                    content: request.text.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::upstream("intent parser", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::upstream("intent parser", e))?;
        if !status.is_success() {
            return Err(CoreError::upstream(
                "intent parser",
                format!("status {status}: {text}"),
            ));
        }

        let reply: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| CoreError::upstream("intent parser", format!("bad response: {e}")))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CoreError::upstream("intent parser", "empty completion"))?;

        debug!("intent parser replied: {}", content);
        parse_operations(&content)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// [`Transcriber`] backed by the `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTranscriber {
    http: reqwest::Client,
    config: PromptConfig,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(config: PromptConfig, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::upstream("transcriber", e))?;
        Ok(Self {
            http,
            config,
            model: "whisper-1".to_string(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, media: &[u8], kind: MediaKind) -> Result<String> {
        let file = reqwest::multipart::Part::bytes(media.to_vec())
            .file_name(kind.file_name())
            .mime_str(kind.mime())
            .map_err(|e| CoreError::upstream("transcriber", e))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", file);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::upstream("transcriber", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::upstream(
                "transcriber",
                format!("status {status}: {text}"),
            ));
        }
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::upstream("transcriber", e))?;
        Ok(body.text)
    }
}
