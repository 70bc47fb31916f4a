//! Planner trait, default plans and plan normalization
//!
//! The planner decides how much context, which response shape and which
//! retrieval a turn gets. A model-backed planner may refine the plan; any
//! failure falls back to the deterministic default for the intent.

use crate::models::{Agent, ContextLevel, Intent, PlannerPlan, ResponseMode};
use crate::request::ChatTurn;
use crate::text::truncate_runes;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub mod llm;
pub use llm::LlmPlanner;

pub const MAX_AGENTS: usize = 6;
pub const MAX_CLARIFICATION_RUNES: usize = 280;

/// Trait for plan generation (model controlled)
#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose a normalized plan for the turn
    async fn create_plan(&self, turn: &ChatTurn, intent: Intent) -> Result<PlannerPlan>;
}

/// Result of the planning stage; never an error
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: PlannerPlan,
    pub warning: Option<String>,
    /// Whether a model call was issued
    pub model_called: bool,
}

/// Fixed plan for each intent
pub fn default_plan(intent: Intent) -> PlannerPlan {
    let (context_level, response_mode, need_wiki, need_web, agents) = match intent {
        Intent::Smalltalk => (
            ContextLevel::None,
            ResponseMode::Short,
            false,
            false,
            vec![Agent::IntentRouter],
        ),
        Intent::TradingAnalysis => (
            ContextLevel::Full,
            ResponseMode::Structured,
            false,
            false,
            vec![Agent::ScanAnalyzer, Agent::RiskChecker],
        ),
        Intent::ProductHelp => (
            ContextLevel::Summary,
            ResponseMode::Qa,
            true,
            false,
            vec![Agent::WikiRetriever],
        ),
        Intent::DebugSupport => (
            ContextLevel::Summary,
            ResponseMode::Diagnostic,
            true,
            false,
            vec![Agent::DebugHelper, Agent::WikiRetriever],
        ),
        Intent::WebResearch => (
            ContextLevel::Summary,
            ResponseMode::Qa,
            false,
            true,
            vec![Agent::WebRetriever],
        ),
        Intent::General => (
            ContextLevel::Summary,
            ResponseMode::Qa,
            false,
            false,
            vec![Agent::IntentRouter],
        ),
    };

    PlannerPlan {
        intent,
        context_level,
        response_mode,
        need_wiki,
        need_web,
        ask_clarification: false,
        clarification: String::new(),
        agents,
    }
}

/// Whitelist a model-proposed plan against the closed vocabularies.
/// Invalid or missing fields take the default plan's value for the resolved intent.
pub fn normalize_plan(raw: &Value, classified: Intent) -> PlannerPlan {
    let intent = str_field(raw, "intent")
        .and_then(Intent::parse)
        .unwrap_or(classified);
    let fallback = default_plan(intent);

    let agents = match raw.get("agents").and_then(Value::as_array) {
        Some(items) => {
            let mut agents: Vec<Agent> = Vec::with_capacity(MAX_AGENTS);
            for agent in items.iter().filter_map(Value::as_str).filter_map(Agent::parse) {
                if !agents.contains(&agent) {
                    agents.push(agent);
                }
                if agents.len() == MAX_AGENTS {
                    break;
                }
            }
            agents
        }
        None => fallback.agents.clone(),
    };

    PlannerPlan {
        intent,
        context_level: str_field(raw, "context_level")
            .and_then(ContextLevel::parse)
            .unwrap_or(fallback.context_level),
        response_mode: str_field(raw, "response_mode")
            .and_then(ResponseMode::parse)
            .unwrap_or(fallback.response_mode),
        need_wiki: bool_field(raw, "need_wiki").unwrap_or(fallback.need_wiki),
        need_web: bool_field(raw, "need_web").unwrap_or(fallback.need_web),
        ask_clarification: bool_field(raw, "ask_clarification").unwrap_or(false),
        clarification: truncate_runes(
            str_field(raw, "clarification").unwrap_or("").trim(),
            MAX_CLARIFICATION_RUNES,
        ),
        agents,
    }
}

/// Hard rules that hold whatever the model proposed
pub fn apply_guardrails(mut plan: PlannerPlan) -> PlannerPlan {
    match plan.intent {
        Intent::Smalltalk => {
            plan.context_level = ContextLevel::None;
            plan.need_wiki = false;
            plan.need_web = false;
            plan.response_mode = ResponseMode::Short;
        }
        Intent::TradingAnalysis => {
            plan.context_level = ContextLevel::Full;
            if plan.agents.is_empty() {
                plan.agents = default_plan(Intent::TradingAnalysis).agents;
            }
        }
        _ => {}
    }
    plan
}

/// Run the planning stage for a turn
pub async fn plan_turn(planner: &dyn Planner, turn: &ChatTurn, intent: Intent) -> PlanOutcome {
    let mut outcome = if !turn.enable_planner || intent == Intent::Smalltalk {
        PlanOutcome {
            plan: default_plan(intent),
            warning: None,
            model_called: false,
        }
    } else {
        match planner.create_plan(turn, intent).await {
            Ok(plan) => {
                info!(
                    request_id = %turn.request_id,
                    intent = %plan.intent,
                    context_level = plan.context_level.as_str(),
                    "Planner produced a plan"
                );
                PlanOutcome {
                    plan,
                    warning: None,
                    model_called: true,
                }
            }
            Err(e) => {
                warn!(request_id = %turn.request_id, "Planner failed, using default plan: {}", e);
                PlanOutcome {
                    plan: default_plan(intent),
                    warning: Some(format!("planner unavailable, default plan used: {}", e)),
                    model_called: true,
                }
            }
        }
    };

    outcome.plan = apply_guardrails(outcome.plan);
    outcome.plan.need_wiki &= turn.enable_wiki;
    outcome.plan.need_web &= turn.enable_web;
    outcome
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn bool_field(raw: &Value, key: &str) -> Option<bool> {
    match raw.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdvisorError;
    use serde_json::json;

    struct FixedPlanner(Option<PlannerPlan>);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn create_plan(&self, _turn: &ChatTurn, _intent: Intent) -> Result<PlannerPlan> {
            self.0
                .clone()
                .ok_or_else(|| AdvisorError::Planner("timed out".to_string()))
        }
    }

    #[test]
    fn test_default_table() {
        let trading = default_plan(Intent::TradingAnalysis);
        assert_eq!(trading.context_level, ContextLevel::Full);
        assert_eq!(trading.response_mode, ResponseMode::Structured);
        assert_eq!(trading.agents, vec![Agent::ScanAnalyzer, Agent::RiskChecker]);

        assert!(default_plan(Intent::ProductHelp).need_wiki);
        assert!(default_plan(Intent::DebugSupport).need_wiki);
        assert_eq!(default_plan(Intent::DebugSupport).response_mode, ResponseMode::Diagnostic);
        assert!(default_plan(Intent::WebResearch).need_web);
        assert_eq!(default_plan(Intent::Smalltalk).context_level, ContextLevel::None);
        assert_eq!(default_plan(Intent::General).context_level, ContextLevel::Summary);
    }

    #[test]
    fn test_normalize_whitelists_fields() {
        let raw = json!({
            "intent": "product_help",
            "context_level": "everything",
            "response_mode": "structured",
            "need_wiki": "yes",
            "agents": ["wiki_retriever", "hacker", "wiki_retriever", 42, "debug_helper"],
            "clarification": "x".repeat(400)
        });

        let plan = normalize_plan(&raw, Intent::General);

        assert_eq!(plan.intent, Intent::ProductHelp);
        assert_eq!(plan.context_level, ContextLevel::Summary);
        assert_eq!(plan.response_mode, ResponseMode::Structured);
        assert!(plan.need_wiki);
        assert!(!plan.need_web);
        assert_eq!(plan.agents, vec![Agent::WikiRetriever, Agent::DebugHelper]);
        assert_eq!(plan.clarification.chars().count(), MAX_CLARIFICATION_RUNES);
    }

    #[test]
    fn test_normalize_invalid_intent_keeps_classified() {
        let plan = normalize_plan(&json!({"intent": "shopping"}), Intent::WebResearch);
        assert_eq!(plan, default_plan(Intent::WebResearch));
    }

    #[test]
    fn test_agents_capped() {
        let mut names: Vec<&str> = Agent::ALL.iter().map(|a| a.as_str()).collect();
        names.extend(["intent_router", "scan_analyzer"]);
        let plan = normalize_plan(&json!({ "agents": names }), Intent::General);
        assert_eq!(plan.agents.len(), MAX_AGENTS);
    }

    #[test]
    fn test_guardrails() {
        let mut chatty = default_plan(Intent::Smalltalk);
        chatty.context_level = ContextLevel::Full;
        chatty.need_web = true;
        chatty.response_mode = ResponseMode::Structured;
        let chatty = apply_guardrails(chatty);
        assert_eq!(chatty.context_level, ContextLevel::None);
        assert!(!chatty.need_web && !chatty.need_wiki);
        assert_eq!(chatty.response_mode, ResponseMode::Short);

        let mut trading = default_plan(Intent::TradingAnalysis);
        trading.context_level = ContextLevel::Summary;
        trading.agents.clear();
        let trading = apply_guardrails(trading);
        assert_eq!(trading.context_level, ContextLevel::Full);
        assert!(!trading.agents.is_empty());
    }

    #[tokio::test]
    async fn test_plan_turn_falls_back_with_warning() {
        let turn = crate::testing::turn("what is new in the scanner?");
        let outcome = plan_turn(&FixedPlanner(None), &turn, Intent::General).await;

        assert_eq!(outcome.plan, default_plan(Intent::General));
        assert!(outcome.warning.unwrap().contains("planner unavailable"));
        assert!(outcome.model_called);
    }

    #[tokio::test]
    async fn test_plan_turn_skips_model_for_smalltalk_and_disabled() {
        let proposed = default_plan(Intent::WebResearch);
        let planner = FixedPlanner(Some(proposed));

        let turn = crate::testing::turn("hi");
        let outcome = plan_turn(&planner, &turn, Intent::Smalltalk).await;
        assert!(!outcome.model_called);
        assert_eq!(outcome.plan.intent, Intent::Smalltalk);

        let mut turn = crate::testing::turn("find news");
        turn.enable_planner = false;
        turn.enable_web = false;
        let outcome = plan_turn(&planner, &turn, Intent::WebResearch).await;
        assert!(!outcome.model_called);
        assert!(!outcome.plan.need_web);
    }
}
