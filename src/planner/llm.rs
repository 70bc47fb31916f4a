//! Model-backed planner
//!
//! One low-cost JSON-only call per turn; the reply is whitelisted by
//! [`normalize_plan`](super::normalize_plan) before anything trusts it.

use crate::error::AdvisorError;
use crate::models::{HistoryMessage, Intent, MessageRole, PlannerPlan};
use crate::provider::{ChatProvider, ProviderCall};
use crate::request::ChatTurn;
use crate::text::truncate_runes;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const PLANNER_MAX_TOKENS: u32 = 220;
const PLANNER_HISTORY_TURNS: usize = 6;
const PLANNER_TURN_CHARS: usize = 220;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are the routing planner of a trading assistant.
Return ONLY one JSON object, no prose, no markdown:
{
  "intent": "smalltalk|trading_analysis|product_help|debug_support|web_research|general",
  "context_level": "none|summary|full",
  "response_mode": "short|structured|diagnostic|qa",
  "need_wiki": false,
  "need_web": false,
  "ask_clarification": false,
  "clarification": "",
  "agents": ["intent_router|scan_analyzer|risk_checker|wiki_retriever|web_retriever|debug_helper"]
}
Rules:
- Ask for clarification only when the request cannot be answered at all.
- Use "full" context only when individual scan rows matter.
- need_web only for fresh external information."#;

pub struct LlmPlanner {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Build the planner's user turn
    fn build_prompt(turn: &ChatTurn, intent: Intent) -> String {
        let mut prompt = format!(
            "USER MESSAGE:\n{}\n\nHEURISTIC INTENT: {}\n",
            turn.user_message, intent
        );

        let recent: Vec<&HistoryMessage> = turn
            .history
            .iter()
            .rev()
            .take(PLANNER_HISTORY_TURNS)
            .collect();
        if !recent.is_empty() {
            prompt.push_str("\nRECENT TURNS:\n");
            for msg in recent.into_iter().rev() {
                let who = if msg.role == MessageRole::User { "user" } else { "assistant" };
                prompt.push_str(&format!(
                    "- {}: {}\n",
                    who,
                    truncate_runes(&msg.content, PLANNER_TURN_CHARS)
                ));
            }
        }

        prompt.push_str("\nCONTEXT: ");
        prompt.push_str(&context_summary(turn));
        prompt
    }
}

/// One-paragraph description of what context the client sent
pub fn context_summary(turn: &ChatTurn) -> String {
    let ctx = &turn.context;
    let mut parts = vec![format!(
        "tab {}, scan {}",
        ctx.tab_id.as_deref().unwrap_or("unknown"),
        ctx.scan_id.as_deref().unwrap_or("unknown")
    )];
    parts.push(format!("{} result rows attached", ctx.rows.len()));
    if let Some(summary) = &ctx.summary {
        parts.push(format!(
            "{} visible of {} total rows",
            summary.visible_rows, summary.total_rows
        ));
    } else {
        parts.push("no scan summary".to_string());
    }
    parts.push(format!("{} scan settings", ctx.scan_snapshot.len()));
    parts.push(format!("{} prior turns", turn.history.len()));
    format!("{}.", parts.join("; "))
}

/// Extract the JSON object from a reply that may carry fences or prose
fn extract_json_object(response: &str) -> Option<&str> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    (end > start).then(|| &cleaned[start..=end])
}

#[async_trait]
impl super::Planner for LlmPlanner {
    async fn create_plan(&self, turn: &ChatTurn, intent: Intent) -> Result<PlannerPlan> {
        let call = ProviderCall {
            provider: turn.provider.clone(),
            base_url: turn.base_url.clone(),
            api_key: turn.api_key.clone(),
            model: turn.planner_model.clone(),
            messages: vec![
                HistoryMessage {
                    role: MessageRole::System,
                    content: PLANNER_SYSTEM_PROMPT.to_string(),
                },
                HistoryMessage {
                    role: MessageRole::User,
                    content: Self::build_prompt(turn, intent),
                },
            ],
            temperature: 0.0,
            max_tokens: PLANNER_MAX_TOKENS,
            timeout: self.timeout,
        };

        let reply = tokio::time::timeout(self.timeout, self.provider.complete(&call))
            .await
            .map_err(|_| AdvisorError::Timeout(self.timeout.as_secs()))??;

        if reply.answer.trim().is_empty() {
            return Err(AdvisorError::Planner("empty planner response".to_string()));
        }

        let json = extract_json_object(&reply.answer).ok_or_else(|| {
            AdvisorError::Planner("planner response contains no JSON object".to_string())
        })?;

        let raw: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            AdvisorError::Planner(format!("failed to parse planner response: {}", e))
        })?;

        if !raw.is_object() {
            return Err(AdvisorError::Planner("planner response is not an object".to_string()));
        }

        Ok(super::normalize_plan(&raw, intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, ContextLevel};
    use crate::planner::Planner;
    use crate::testing::{reply, turn, ScriptedProvider};

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(
            extract_json_object("Here is the plan: {\"a\":{\"b\":2}} hope it helps"),
            Some("{\"a\":{\"b\":2}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} {"), None);
    }

    #[test]
    fn test_prompt_trims_history() {
        let mut t = turn("and the risk?");
        for i in 0..10 {
            t.history.push(HistoryMessage {
                role: MessageRole::User,
                content: format!("turn-{} {}", i, "y".repeat(400)),
            });
        }

        let prompt = LlmPlanner::build_prompt(&t, Intent::TradingAnalysis);

        assert!(!prompt.contains("turn-3 "));
        assert!(prompt.contains("turn-4 "));
        assert!(prompt.contains("turn-9 "));
        assert!(!prompt.contains(&"y".repeat(PLANNER_TURN_CHARS)));
        assert!(prompt.contains("HEURISTIC INTENT: trading_analysis"));
    }

    #[tokio::test]
    async fn test_create_plan_uses_cheap_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(reply(
            r#"```json
{"intent":"trading_analysis","context_level":"summary","response_mode":"structured","agents":["scan_analyzer"]}
```"#,
        ))]));
        let planner = LlmPlanner::new(provider.clone(), Duration::from_secs(35));
        let mut t = turn("top trades in current scan");
        t.planner_model = "gpt-4o-mini".to_string();

        let plan = planner.create_plan(&t, Intent::TradingAnalysis).await.unwrap();

        // normalization only; guardrails run in plan_turn
        assert_eq!(plan.context_level, ContextLevel::Summary);
        assert_eq!(plan.agents, vec![Agent::ScanAnalyzer]);

        let call = provider.last_call().unwrap();
        assert_eq!(call.temperature, 0.0);
        assert_eq!(call.max_tokens, PLANNER_MAX_TOKENS);
        assert_eq!(call.model, "gpt-4o-mini");
        assert_eq!(call.messages[0].role, MessageRole::System);
    }

    #[tokio::test]
    async fn test_create_plan_rejects_garbage() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(reply("")),
            Ok(reply("I think you want trading analysis.")),
            Ok(reply("{not json}")),
        ]));
        let planner = LlmPlanner::new(provider, Duration::from_secs(35));
        let t = turn("hello there, what can you do");

        for _ in 0..3 {
            assert!(matches!(
                planner.create_plan(&t, Intent::General).await,
                Err(AdvisorError::Planner(_))
            ));
        }
    }
}
