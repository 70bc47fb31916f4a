//! Chat-completion client for the language-model provider
//!
//! Speaks the OpenAI-compatible `/chat/completions` wire format, sync and streamed.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::{clip_body, AdvisorError};
use crate::models::{HistoryMessage, MessageRole, ProviderReply};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info};

/// Raw lines of a streamed provider response, without line terminators
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One fully-specified model invocation
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub messages: Vec<HistoryMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ProviderCall {
    #[cfg(test)]
    pub(crate) fn for_tests(model: &str) -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: "sk-test".to_string(),
            model: model.to_string(),
            messages: vec![HistoryMessage {
                role: MessageRole::User,
                content: "hello".to_string(),
            }],
            temperature: 0.3,
            max_tokens: 800,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Trait for the model provider (sync completion + line stream)
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, call: &ProviderCall) -> Result<ProviderReply>;

    async fn stream(&self, call: &ProviderCall) -> Result<LineStream>;
}

/// Short, non-reversible identifier for an API key, safe to log
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    hex::encode(&digest[..4])
}

/// Reusable HTTP provider client (connection-pooled)
pub struct HttpChatProvider {
    client: Client,
}

impl HttpChatProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, call: &ProviderCall, streaming: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", call.base_url.trim_end_matches('/'));
        let request = CompletionRequest::from_call(call, streaming);

        info!(
            provider = %call.provider,
            model = %call.model,
            key = %key_fingerprint(&call.api_key),
            messages = call.messages.len(),
            streaming,
            "Calling chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&call.api_key)
            .timeout(call.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Provider request failed: {}", e);
                if e.is_timeout() {
                    AdvisorError::Timeout(call.timeout.as_secs())
                } else {
                    AdvisorError::Provider(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Provider error response");
            return Err(AdvisorError::ProviderStatus {
                status: status.as_u16(),
                body: clip_body(&body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn complete(&self, call: &ProviderCall) -> Result<ProviderReply> {
        let response = self.send(call, false).await?;

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AdvisorError::Timeout(call.timeout.as_secs())
            } else {
                AdvisorError::Provider(format!("failed to read body: {}", e))
            }
        })?;

        parse_completion(&body, &call.model)
    }

    async fn stream(&self, call: &ProviderCall) -> Result<LineStream> {
        let response = self.send(call, true).await?;
        Ok(into_lines(response.bytes_stream()))
    }
}

//
// ================= Wire format =================
//

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> CompletionRequest<'a> {
    fn from_call(call: &'a ProviderCall, streaming: bool) -> Self {
        Self {
            model: &call.model,
            messages: call
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: call.temperature,
            max_tokens: call.max_tokens,
            stream: streaming,
            stream_options: streaming.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Message content arrives either as a plain string or as typed parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// Concatenate the textual content; non-text parts are skipped
    pub fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter(|p| {
                    matches!(p.kind.as_deref(), None | Some("text") | Some("output_text"))
                })
                .filter_map(|p| p.text)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Parse a non-streamed completion body
pub(crate) fn parse_completion(body: &str, requested_model: &str) -> Result<ProviderReply> {
    let response: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        AdvisorError::Provider(format!("malformed completion body: {} | raw={}", e, clip_body(body)))
    })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AdvisorError::Provider("completion has no choices".to_string()))?;

    let answer = choice
        .message
        .and_then(|m| m.content)
        .map(MessageContent::into_text)
        .unwrap_or_default();

    Ok(ProviderReply {
        answer,
        model: response
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| requested_model.to_string()),
        provider_message_id: response.id.unwrap_or_default(),
        usage: response.usage.unwrap_or_default(),
    })
}

//
// ================= Line decoding =================
//

/// Splits a byte stream into lines; partial UTF-8 sequences stay buffered
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn into_lines<S, B>(bytes: S) -> LineStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (Box::pin(bytes), LineDecoder::default(), VecDeque::new(), false);

    Box::pin(stream::unfold(
        state,
        |(mut bytes, mut decoder, mut ready, mut finished)| async move {
            loop {
                if let Some(line) = ready.pop_front() {
                    return Some((Ok(line), (bytes, decoder, ready, finished)));
                }
                if finished {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                    Some(Err(e)) => {
                        finished = true;
                        let err = AdvisorError::Provider(format!("stream interrupted: {}", e));
                        return Some((Err(err), (bytes, decoder, ready, finished)));
                    }
                    None => {
                        finished = true;
                        ready.extend(decoder.finish());
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let call = ProviderCall::for_tests("gpt-4o-mini");
        let json = serde_json::to_value(CompletionRequest::from_call(&call, true)).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);

        let json = serde_json::to_value(CompletionRequest::from_call(&call, false)).unwrap();
        assert!(json.get("stream_options").is_none());
    }

    #[test]
    fn test_parse_completion_string_content() {
        let body = r#"{"id":"chatcmpl-1","model":"gpt-4o-mini-2024","choices":[{"message":{"role":"assistant","content":"Hi!"}}],"usage":{"total_tokens":12}}"#;
        let reply = parse_completion(body, "gpt-4o-mini").unwrap();

        assert_eq!(reply.answer, "Hi!");
        assert_eq!(reply.model, "gpt-4o-mini-2024");
        assert_eq!(reply.provider_message_id, "chatcmpl-1");
        assert_eq!(reply.usage.get("total_tokens"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn test_parse_completion_parts_and_model_fallback() {
        let body = r#"{"choices":[{"message":{"content":[{"type":"text","text":"Hello, "},{"type":"image_url"},{"type":"text","text":"trader"}]}}]}"#;
        let reply = parse_completion(body, "requested").unwrap();

        assert_eq!(reply.answer, "Hello, trader");
        assert_eq!(reply.model, "requested");
        assert!(reply.usage.is_empty());
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#, "m"),
            Err(AdvisorError::Provider(_))
        ));
        assert!(matches!(
            parse_completion("<html>bad gateway</html>", "m"),
            Err(AdvisorError::Provider(_))
        ));
    }

    #[test]
    fn test_line_decoder_handles_split_chunks() {
        let mut decoder = LineDecoder::default();
        let text = "data: {\"a\":\"привет\"}\r\n\ndata: [DONE]";
        let bytes = text.as_bytes();
        // split in the middle of a multi-byte character
        let split = text.find('р').unwrap() + 1;

        let mut lines = decoder.push(&bytes[..split]);
        lines.extend(decoder.push(&bytes[split..]));
        lines.extend(decoder.finish());

        assert_eq!(lines, vec!["data: {\"a\":\"привет\"}", "", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn test_into_lines_flushes_tail() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> =
            vec![Ok(b"data: 1\n\nda".to_vec()), Ok(b"ta: 2".to_vec())];
        let lines: Vec<String> = into_lines(stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["data: 1", "", "data: 2"]);
    }

    #[test]
    fn test_key_fingerprint() {
        let fp = key_fingerprint("sk-secret");
        assert_eq!(fp.len(), 8);
        assert!(!fp.contains("secret"));
        assert_eq!(fp, key_fingerprint("sk-secret"));
    }
}
