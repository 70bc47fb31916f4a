//! Chat request ingestion
//!
//! Turns the wire-level [`ChatRequest`] into a validated [`ChatTurn`]:
//! defaults applied, numeric fields clamped, history normalized and the
//! scan context bounded. Anything still invalid is a 400.

use crate::config::AdvisorConfig;
use crate::error::AdvisorError;
use crate::models::{ContextPayload, HistoryMessage, Locale, MessageRole, RawHistoryMessage};
use crate::text::truncate_runes;
use crate::verification::contains_diagnostic_marker;
use crate::Result;
use serde::{Deserialize, Serialize};

pub const MAX_HISTORY_MESSAGES: usize = 16;
pub const MAX_MESSAGE_RUNES: usize = 4000;
pub const MAX_CONTEXT_ROWS: usize = 100;
pub const MAX_TOKENS_CEILING: u32 = 1_000_000;

const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1400;

/// Request body of both chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatRequest {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub planner_model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub assistant_name: String,
    pub locale: String,
    pub user_message: String,
    pub enable_wiki: Option<bool>,
    pub enable_web: Option<bool>,
    pub enable_planner: Option<bool>,
    pub wiki_repo: String,
    pub history: Vec<RawHistoryMessage>,
    pub context: ContextPayload,
}

/// A validated, request-scoped chat turn
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub request_id: String,
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub planner_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub assistant_name: String,
    pub locale: Locale,
    pub user_message: String,
    pub enable_wiki: bool,
    pub enable_web: bool,
    pub enable_planner: bool,
    pub wiki_repo: String,
    pub history: Vec<HistoryMessage>,
    pub context: ContextPayload,
}

impl ChatRequest {
    /// Validate and normalize the request
    pub fn validate(self, config: &AdvisorConfig) -> Result<ChatTurn> {
        let api_key = self.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(AdvisorError::Validation("api_key is required".to_string()));
        }

        let model = self.model.trim().to_string();
        if model.is_empty() {
            return Err(AdvisorError::Validation("model is required".to_string()));
        }

        let user_message = truncate_runes(self.user_message.trim(), MAX_MESSAGE_RUNES);
        if user_message.is_empty() {
            return Err(AdvisorError::Validation("user_message is required".to_string()));
        }

        let provider = non_empty_or(&self.provider, &config.default_provider).to_lowercase();
        let base_url = config.provider_base_url(&provider).ok_or_else(|| {
            AdvisorError::Validation(format!("unsupported provider: {}", provider))
        })?;

        let temperature = match self.temperature {
            None => DEFAULT_TEMPERATURE,
            Some(t) if !t.is_finite() => {
                return Err(AdvisorError::Validation(
                    "temperature must be a number".to_string(),
                ))
            }
            Some(t) => t.clamp(0.0, 2.0) as f32,
        };

        let max_tokens = match self.max_tokens {
            None | Some(0) => DEFAULT_MAX_TOKENS,
            Some(n) if n < 0 => {
                return Err(AdvisorError::Validation(
                    "max_tokens must be positive".to_string(),
                ))
            }
            Some(n) => n.min(MAX_TOKENS_CEILING as i64) as u32,
        };

        let mut context = self.context;
        context.rows.truncate(MAX_CONTEXT_ROWS);

        Ok(ChatTurn {
            request_id: uuid::Uuid::new_v4().to_string(),
            planner_model: non_empty_or(&self.planner_model, &model),
            provider,
            base_url,
            api_key,
            model,
            temperature,
            max_tokens,
            assistant_name: non_empty_or(&self.assistant_name, &config.assistant_name),
            locale: Locale::parse(&self.locale),
            user_message,
            enable_wiki: self.enable_wiki.unwrap_or(true),
            enable_web: self.enable_web.unwrap_or(true),
            enable_planner: self.enable_planner.unwrap_or(true),
            wiki_repo: non_empty_or(&self.wiki_repo, &config.wiki_repo),
            history: normalize_history(self.history),
            context,
        })
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Keep user/assistant turns only, drop leaked diagnostics, retain the newest 16
pub fn normalize_history(raw: Vec<RawHistoryMessage>) -> Vec<HistoryMessage> {
    let mut kept: Vec<HistoryMessage> = raw
        .into_iter()
        .filter_map(|m| {
            let role = match m.role.trim().to_lowercase().as_str() {
                "user" => MessageRole::User,
                "assistant" => MessageRole::Assistant,
                _ => return None,
            };
            let content = truncate_runes(m.content.trim(), MAX_MESSAGE_RUNES);
            if content.is_empty() {
                return None;
            }
            if role == MessageRole::Assistant && contains_diagnostic_marker(&content) {
                return None;
            }
            Some(HistoryMessage { role, content })
        })
        .collect();

    if kept.len() > MAX_HISTORY_MESSAGES {
        kept.drain(..kept.len() - MAX_HISTORY_MESSAGES);
    }
    kept
}
