//! Streaming Delivery Controller
//!
//! Turns the provider's server-sent-event lines into NDJSON client events.
//! `data:` payloads are buffered until a blank line, `[DONE]` ends the
//! stream, and end-of-stream without the sentinel still flushes what is pending.

use crate::error::AdvisorError;
use crate::models::{ChatResponse, ProviderReply};
use crate::provider::{LineStream, MessageContent};
use crate::text::rune_count;
use crate::Result;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const PROGRESS_GENERATION_START: u8 = 45;
pub const PROGRESS_USAGE: u8 = 96;
pub const PROGRESS_RETRY: u8 = 97;
pub const PROGRESS_DONE: u8 = 100;
/// Share of the bar that generation may fill (45 → 90)
const GENERATION_SPAN: f64 = 45.0;
const RUNES_PER_TOKEN: f64 = 3.6;

/// One NDJSON line sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Progress {
        stage: String,
        progress_pct: u8,
    },
    Delta {
        delta: String,
        progress_pct: u8,
    },
    Usage {
        usage: Map<String, Value>,
        progress_pct: u8,
    },
    #[serde(rename = "result")]
    Final {
        result: Box<ChatResponse>,
        progress_pct: u8,
    },
    Error {
        error: String,
        progress_pct: u8,
    },
}

impl StreamEvent {
    pub fn progress(stage: &str, progress_pct: u8) -> Self {
        StreamEvent::Progress {
            stage: stage.to_string(),
            progress_pct,
        }
    }

    pub fn progress_pct(&self) -> u8 {
        match self {
            StreamEvent::Progress { progress_pct, .. }
            | StreamEvent::Delta { progress_pct, .. }
            | StreamEvent::Usage { progress_pct, .. }
            | StreamEvent::Final { progress_pct, .. }
            | StreamEvent::Error { progress_pct, .. } => *progress_pct,
        }
    }

    /// Serialized NDJSON line, newline included
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"error","error":"failed to encode event: {}","progress_pct":{}}}"#,
                e,
                self.progress_pct()
            )
        });
        line.push('\n');
        line
    }
}

/// Client side of the event channel; a failed send means the client is gone
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: StreamEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| AdvisorError::Cancelled)
    }
}

/// Rough token count used only for progress reporting
pub fn estimate_tokens(text: &str) -> u64 {
    (rune_count(text) as f64 / RUNES_PER_TOKEN).ceil() as u64
}

/// Progress while generating: 45 plus up to 45 more as the answer grows
pub fn generation_progress(answer: &str, max_tokens: u32) -> u8 {
    let budget = max_tokens.clamp(500, 6000) as f64;
    let share = (GENERATION_SPAN * estimate_tokens(answer) as f64 / budget).min(GENERATION_SPAN);
    PROGRESS_GENERATION_START + share.floor() as u8
}

/// What one provider line produced
#[derive(Debug, Clone, PartialEq)]
pub enum SseStep {
    Delta { text: String, progress_pct: u8 },
    Done,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Line-level state machine for a streamed completion
#[derive(Debug)]
pub struct SseAssembler {
    pending: Vec<String>,
    answer: String,
    model: String,
    message_id: String,
    usage: Option<Map<String, Value>>,
    max_tokens: u32,
    done: bool,
}

impl SseAssembler {
    pub fn new(requested_model: &str, max_tokens: u32) -> Self {
        Self {
            pending: Vec::new(),
            answer: String::new(),
            model: requested_model.to_string(),
            message_id: String::new(),
            usage: None,
            max_tokens,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn usage(&self) -> Option<&Map<String, Value>> {
        self.usage.as_ref()
    }

    pub fn push_line(&mut self, line: &str) -> Vec<SseStep> {
        if self.done {
            return Vec::new();
        }

        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return self.flush().into_iter().collect();
        }

        let Some(payload) = line.strip_prefix("data:") else {
            // event:, id:, retry: and comment lines carry nothing we use
            return Vec::new();
        };
        let payload = payload.trim();

        if payload == "[DONE]" {
            let mut steps: Vec<SseStep> = self.flush().into_iter().collect();
            if !matches!(steps.last(), Some(SseStep::Error(_))) {
                self.done = true;
                steps.push(SseStep::Done);
            }
            return steps;
        }

        self.pending.push(payload.to_string());
        Vec::new()
    }

    /// End of the byte stream; flushes anything still buffered
    pub fn finish(&mut self) -> Vec<SseStep> {
        if self.done {
            return Vec::new();
        }
        let mut steps: Vec<SseStep> = self.flush().into_iter().collect();
        if !matches!(steps.last(), Some(SseStep::Error(_))) {
            self.done = true;
            steps.push(SseStep::Done);
        }
        steps
    }

    fn flush(&mut self) -> Option<SseStep> {
        if self.pending.is_empty() {
            return None;
        }
        let data = self.pending.join("\n");
        self.pending.clear();

        let chunk: StreamChunk = match serde_json::from_str(&data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Skipping undecodable stream chunk: {}", e);
                return None;
            }
        };

        if let Some(error) = chunk.error {
            self.done = true;
            return Some(SseStep::Error(error_message(&error)));
        }

        if let Some(model) = chunk.model.filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        if self.message_id.is_empty() {
            if let Some(id) = chunk.id {
                self.message_id = id;
            }
        }
        if let Some(usage) = chunk.usage.filter(|u| !u.is_empty()) {
            self.usage = Some(usage);
        }

        let text: String = chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.and_then(|d| d.content))
            .map(MessageContent::into_text)
            .collect();
        if text.is_empty() {
            return None;
        }

        self.answer.push_str(&text);
        Some(SseStep::Delta {
            text,
            progress_pct: generation_progress(&self.answer, self.max_tokens),
        })
    }

    pub fn into_reply(self) -> ProviderReply {
        ProviderReply {
            answer: self.answer,
            model: self.model,
            provider_message_id: self.message_id,
            usage: self.usage.unwrap_or_default(),
        }
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Drive a provider line stream to completion, forwarding deltas to `sink`
pub async fn relay_stream(
    mut lines: LineStream,
    requested_model: &str,
    max_tokens: u32,
    sink: &EventSink,
) -> Result<ProviderReply> {
    let mut assembler = SseAssembler::new(requested_model, max_tokens);

    while !assembler.is_done() {
        let steps = match lines.next().await {
            Some(Ok(line)) => assembler.push_line(&line),
            Some(Err(e)) => {
                warn!("Provider stream failed: {}", e);
                return Err(e);
            }
            None => assembler.finish(),
        };

        for step in steps {
            match step {
                SseStep::Delta { text, progress_pct } => {
                    sink.send(StreamEvent::Delta {
                        delta: text,
                        progress_pct,
                    })
                    .await?;
                }
                SseStep::Error(message) => {
                    return Err(AdvisorError::Provider(format!("stream error: {}", message)));
                }
                SseStep::Done => {}
            }
        }
    }

    if let Some(usage) = assembler.usage().cloned() {
        sink.send(StreamEvent::Usage {
            usage,
            progress_pct: PROGRESS_USAGE,
        })
        .await?;
    }

    Ok(assembler.into_reply())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk(text: &str) -> String {
        format!(
            r#"data: {{"id":"c1","model":"m-1","choices":[{{"delta":{{"content":{}}}}}]}}"#,
            serde_json::to_string(text).unwrap()
        )
    }

    #[test]
    fn test_progress_formula() {
        assert_eq!(generation_progress("", 1400), 45);
        // 36 runes -> 10 tokens; 45 * 10 / 500 = 0.9
        assert_eq!(generation_progress(&"x".repeat(36), 100), 45);
        assert_eq!(generation_progress(&"x".repeat(3600), 2000), 67);
        assert_eq!(generation_progress(&"x".repeat(100_000), 800), 90);
        assert_eq!(estimate_tokens("abcd"), 2);
    }

    #[test]
    fn test_blank_line_flushes_and_done_terminates() {
        let mut sse = SseAssembler::new("requested", 1000);
        assert!(sse.push_line(&chunk("Hel")).is_empty());
        let steps = sse.push_line("");
        assert!(matches!(&steps[..], [SseStep::Delta { text, .. }] if text == "Hel"));

        sse.push_line(": keep-alive");
        sse.push_line(&chunk("lo"));
        let steps = sse.push_line("data: [DONE]");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1], SseStep::Done);
        assert!(sse.is_done());
        assert!(sse.push_line(&chunk("ignored")).is_empty());

        let reply = sse.into_reply();
        assert_eq!(reply.answer, "Hello");
        assert_eq!(reply.model, "m-1");
        assert_eq!(reply.provider_message_id, "c1");
    }

    #[test]
    fn test_parts_content_and_usage() {
        let mut sse = SseAssembler::new("requested", 1000);
        sse.push_line(r#"data: {"choices":[{"delta":{"content":[{"type":"text","text":"A"},{"type":"text","text":"B"}]}}]}"#);
        let steps = sse.push_line("");
        assert!(matches!(&steps[..], [SseStep::Delta { text, .. }] if text == "AB"));

        sse.push_line(r#"data: {"choices":[],"usage":{"total_tokens":7}}"#);
        assert!(sse.push_line("").is_empty());
        assert_eq!(sse.usage().unwrap().get("total_tokens"), Some(&serde_json::json!(7)));
        assert_eq!(sse.into_reply().model, "requested");
    }

    #[test]
    fn test_eof_without_sentinel_flushes() {
        let mut sse = SseAssembler::new("m", 1000);
        sse.push_line(&chunk("tail"));
        let steps = sse.finish();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1], SseStep::Done);
        assert_eq!(sse.answer(), "tail");
    }

    #[test]
    fn test_error_chunk_aborts() {
        let mut sse = SseAssembler::new("m", 1000);
        sse.push_line(r#"data: {"error":{"message":"rate limited"}}"#);
        let steps = sse.push_line("");
        assert_eq!(steps, vec![SseStep::Error("rate limited".to_string())]);
        assert!(sse.is_done());
    }

    #[tokio::test]
    async fn test_relay_forwards_deltas_and_usage() {
        let lines = vec![
            chunk("one "),
            String::new(),
            chunk("two"),
            String::new(),
            r#"data: {"choices":[],"usage":{"total_tokens":3}}"#.to_string(),
            String::new(),
            "data: [DONE]".to_string(),
        ];
        let line_stream: LineStream = Box::pin(stream::iter(lines.into_iter().map(Ok::<String, AdvisorError>)));
        let (tx, mut rx) = mpsc::channel(16);

        let reply = relay_stream(line_stream, "m", 1000, &EventSink::new(tx))
            .await
            .unwrap();

        assert_eq!(reply.answer, "one two");
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                StreamEvent::Delta { .. } => "delta",
                StreamEvent::Usage { progress_pct, .. } => {
                    assert_eq!(progress_pct, PROGRESS_USAGE);
                    "usage"
                }
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["delta", "delta", "usage"]);
    }

    #[tokio::test]
    async fn test_relay_stops_when_client_is_gone() {
        let lines = vec![chunk("x"), String::new()];
        let line_stream: LineStream = Box::pin(stream::iter(lines.into_iter().map(Ok::<String, AdvisorError>)));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = relay_stream(line_stream, "m", 1000, &EventSink::new(tx)).await;
        assert!(matches!(result, Err(AdvisorError::Cancelled)));
    }

    #[test]
    fn test_event_lines() {
        let line = StreamEvent::progress("classify", 5).to_line();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["progress_pct"], 5);
    }
}
