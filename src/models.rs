//! Core data models for the advisory pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    /// Anything that looks Russian is Russian, everything else falls back to English
    pub fn parse(raw: &str) -> Self {
        if raw.trim().to_lowercase().starts_with("ru") {
            Locale::Ru
        } else {
            Locale::En
        }
    }

    /// Pick the localized variant of a phrase
    pub fn pick<'a>(self, en: &'a str, ru: &'a str) -> &'a str {
        match self {
            Locale::En => en,
            Locale::Ru => ru,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ru => "ru",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Smalltalk,
    TradingAnalysis,
    ProductHelp,
    DebugSupport,
    WebResearch,
    General,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::Smalltalk,
        Intent::TradingAnalysis,
        Intent::ProductHelp,
        Intent::DebugSupport,
        Intent::WebResearch,
        Intent::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Smalltalk => "smalltalk",
            Intent::TradingAnalysis => "trading_analysis",
            Intent::ProductHelp => "product_help",
            Intent::DebugSupport => "debug_support",
            Intent::WebResearch => "web_research",
            Intent::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_lowercase();
        Self::ALL.into_iter().find(|i| i.as_str() == wanted)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    None,
    Summary,
    Full,
}

impl ContextLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextLevel::None => "none",
            ContextLevel::Summary => "summary",
            ContextLevel::Full => "full",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" => Some(ContextLevel::None),
            "summary" => Some(ContextLevel::Summary),
            "full" => Some(ContextLevel::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Short,
    Structured,
    Diagnostic,
    Qa,
}

impl ResponseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseMode::Short => "short",
            ResponseMode::Structured => "structured",
            ResponseMode::Diagnostic => "diagnostic",
            ResponseMode::Qa => "qa",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "short" => Some(ResponseMode::Short),
            "structured" => Some(ResponseMode::Structured),
            "diagnostic" => Some(ResponseMode::Diagnostic),
            "qa" => Some(ResponseMode::Qa),
            _ => None,
        }
    }
}

/// Closed vocabulary of internal helper roles a plan may activate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    IntentRouter,
    ScanAnalyzer,
    RiskChecker,
    WikiRetriever,
    WebRetriever,
    DebugHelper,
}

impl Agent {
    pub const ALL: [Agent; 6] = [
        Agent::IntentRouter,
        Agent::ScanAnalyzer,
        Agent::RiskChecker,
        Agent::WikiRetriever,
        Agent::WebRetriever,
        Agent::DebugHelper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Agent::IntentRouter => "intent_router",
            Agent::ScanAnalyzer => "scan_analyzer",
            Agent::RiskChecker => "risk_checker",
            Agent::WikiRetriever => "wiki_retriever",
            Agent::WebRetriever => "web_retriever",
            Agent::DebugHelper => "debug_helper",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|a| a.as_str() == wanted)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

//
// ================= Conversation =================
//

/// A history turn as it arrives on the wire; roles are validated later
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawHistoryMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// A normalized history turn (user or assistant only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
}

//
// ================= Scan Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextPayload {
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub scan_id: Option<String>,
    /// Scan configuration as the scan engine reported it
    #[serde(default)]
    pub scan_snapshot: Map<String, Value>,
    #[serde(default)]
    pub summary: Option<ScanSummary>,
    #[serde(default)]
    pub rows: Vec<ScanRow>,
    /// Server-owned; whatever the client sends here is ignored
    #[serde(default, skip_deserializing)]
    pub runtime: RuntimeContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanSummary {
    #[serde(default)]
    pub visible_rows: u64,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub sell_price: Option<f64>,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub profit_pct: Option<f64>,
    /// Composite score computed by the scan engine
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub extreme: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScanRow {
    pub fn is_actionable(&self) -> bool {
        self.profit > 0.0
    }

    /// Rows flagged by the scan engine as risky
    pub fn is_risky(&self) -> bool {
        let level = self.risk.as_deref().unwrap_or("").trim().to_lowercase();
        matches!(level.as_str(), "high" | "critical" | "risky")
    }
}

//
// ================= Runtime (account) Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeContext {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletBalance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<OrdersSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_flow: Option<TradeFlowSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletBalance {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub item: String,
    pub side: TradeSide,
    pub price: f64,
    #[serde(default = "one")]
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub item: String,
    pub side: TradeSide,
    pub price: f64,
    #[serde(default = "one")]
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OrdersSummary {
    pub buy_count: usize,
    pub sell_count: usize,
    pub open_notional: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TradeFlowSummary {
    pub window_days: i64,
    pub trade_count: usize,
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub net_flow: f64,
    pub top_items: Vec<ItemTurnover>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemTurnover {
    pub item: String,
    pub turnover: f64,
    pub trades: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSummary {
    pub distinct_items: usize,
    pub top_item_share_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_buy_ratio: Option<f64>,
    pub level: RiskLevel,
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerPlan {
    pub intent: Intent,
    pub context_level: ContextLevel,
    pub response_mode: ResponseMode,
    pub need_wiki: bool,
    pub need_web: bool,
    pub ask_clarification: bool,
    #[serde(default)]
    pub clarification: String,
    pub agents: Vec<Agent>,
}

impl PlannerPlan {
    pub fn has_agent(&self, agent: Agent) -> bool {
        self.agents.contains(&agent)
    }

    /// Clarification text when the plan asks the user a question instead of answering
    pub fn clarification_question(&self) -> Option<&str> {
        let text = self.clarification.trim();
        (self.ask_clarification && !text.is_empty()).then_some(text)
    }
}

//
// ================= Preflight =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreflightStatus {
    Pass,
    Partial,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreflightResult {
    pub status: PreflightStatus,
    pub missing: Vec<String>,
    pub caveats: Vec<String>,
}

//
// ================= Knowledge =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceLabel {
    Wiki,
    Readme,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub source_label: SourceLabel,
    pub title: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

//
// ================= Provider =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderReply {
    pub answer: String,
    pub model: String,
    pub provider_message_id: String,
    pub usage: Map<String, Value>,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineMeta {
    pub request_id: String,
    pub classified_intent: Option<Intent>,
    pub plan: Option<PlannerPlan>,
    pub planner_used: bool,
    pub clarification: bool,
    pub preflight: Option<PreflightResult>,
    pub runtime_requested: bool,
    pub runtime_available: bool,
    pub wiki_snippets: usize,
    pub web_snippets: usize,
    pub retried: bool,
    pub model_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub provider: String,
    pub model: String,
    pub assistant: String,
    pub intent: Intent,
    pub pipeline: PipelineMeta,
    pub warnings: Vec<String>,
    pub provider_id: String,
    pub provider_usage: Map<String, Value>,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_runtime_is_discarded() {
        let payload: ContextPayload = serde_json::from_value(serde_json::json!({
            "tab_id": "scanner",
            "rows": [{"name": "AK-47 | Redline", "profit": 3.5, "tier": "A"}],
            "runtime": {"available": true, "account_id": "spoofed"}
        }))
        .unwrap();

        assert!(!payload.runtime.available);
        assert!(payload.runtime.account_id.is_none());
        assert_eq!(payload.rows[0].extra.get("tier"), Some(&serde_json::json!("A")));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(Intent::parse(" Trading_Analysis "), Some(Intent::TradingAnalysis));
        assert_eq!(Intent::parse("chitchat"), None);
        assert_eq!(Agent::parse("risk-checker"), Some(Agent::RiskChecker));
        assert_eq!(ContextLevel::parse("FULL"), Some(ContextLevel::Full));
        assert_eq!(ResponseMode::parse("essay"), None);
        assert_eq!(Locale::parse("ru-RU"), Locale::Ru);
        assert_eq!(Locale::parse("de"), Locale::En);
    }

    #[test]
    fn test_clarification_question() {
        let mut plan = PlannerPlan {
            intent: Intent::General,
            context_level: ContextLevel::Summary,
            response_mode: ResponseMode::Qa,
            need_wiki: false,
            need_web: false,
            ask_clarification: true,
            clarification: "   ".to_string(),
            agents: vec![],
        };
        assert!(plan.clarification_question().is_none());

        plan.clarification = "Which tab do you mean?".to_string();
        assert_eq!(plan.clarification_question(), Some("Which tab do you mean?"));
    }
}
