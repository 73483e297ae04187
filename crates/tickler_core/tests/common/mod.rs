//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tickler_core::capability::{IntentParser, MediaKind, Notifier, ParseRequest, Transcriber};
use tickler_core::{CoreError, OperationRequest, Result};

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn moscow() -> Tz {
    chrono_tz::Europe::Moscow
}

/// Records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Fails the first `failures` sends, then records like [`RecordingNotifier`].
#[derive(Debug, Default)]
pub struct FlakyNotifier {
    failures: AtomicUsize,
    pub inner: RecordingNotifier,
}

impl FlakyNotifier {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            inner: RecordingNotifier::default(),
        }
    }
}

#[async_trait]
impl Notifier for FlakyNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(CoreError::notify(chat_id, "chat unreachable"));
        }
        self.inner.send(chat_id, text).await
    }
}

/// Hands out pre-scripted batches, one per call. Runs dry into an upstream
/// error.
#[derive(Debug, Default)]
pub struct ScriptedParser {
    batches: Mutex<VecDeque<Vec<OperationRequest>>>,
    pub seen: Mutex<Vec<String>>,
}

impl ScriptedParser {
    pub fn new(batches: Vec<Vec<OperationRequest>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, batch: Vec<OperationRequest>) {
        self.batches.lock().unwrap().push_back(batch);
    }
}

#[async_trait]
impl IntentParser for ScriptedParser {
    async fn parse(&self, request: &ParseRequest<'_>) -> Result<Vec<OperationRequest>> {
        self.seen.lock().unwrap().push(request.text.to_string());
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::upstream("scripted parser", "script exhausted"))
    }
}

/// Never answers in time.
#[derive(Debug)]
pub struct SlowParser(pub Duration);

#[async_trait]
impl IntentParser for SlowParser {
    async fn parse(&self, _request: &ParseRequest<'_>) -> Result<Vec<OperationRequest>> {
        tokio::time::sleep(self.0).await;
        Ok(Vec::new())
    }
}

/// Returns the same transcript for every upload and remembers what kind of
/// media it was given.
#[derive(Debug)]
pub struct CannedTranscriber {
    transcript: String,
    pub kinds: Mutex<Vec<MediaKind>>,
}

impl CannedTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            kinds: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transcriber for CannedTranscriber {
    async fn transcribe(&self, media: &[u8], kind: MediaKind) -> Result<String> {
        if media.is_empty() {
            return Err(CoreError::upstream("canned transcriber", "empty upload"));
        }
        self.kinds.lock().unwrap().push(kind);
        Ok(self.transcript.clone())
    }
}

/// Parse a wire-format operation, the way a parser reply would arrive.
pub fn op(json: &str) -> OperationRequest {
    serde_json::from_str(json).unwrap()
}
