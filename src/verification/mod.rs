//! Answer validation and the single corrective retry
//!
//! Rules-based checks on the generated answer before it leaves the service.
//! A rejected answer gets exactly one corrective attempt; a second rejection
//! keeps the original answer and downgrades both reasons to warnings.

use crate::models::{HistoryMessage, Intent, Locale, MessageRole, ProviderReply};
use crate::provider::{ChatProvider, ProviderCall};
use crate::text::rune_count;
use tracing::{info, warn};

/// Field and status names of the internal planner/preflight contract.
/// They only reach an answer when the model echoes its instructions.
pub const DIAGNOSTIC_MARKERS: &[&str] = &[
    "context_level",
    "response_mode",
    "need_wiki",
    "need_web",
    "ask_clarification",
    "preflight_status",
    "preflight_missing",
    "preflight_caveats",
    "internal_agent_notes",
    "planner_plan",
];

/// Minimum length of a trading answer before it counts as grounded
const MIN_TRADING_ANSWER_RUNES: usize = 60;

pub fn contains_diagnostic_marker(text: &str) -> bool {
    let lowered = text.to_lowercase();
    DIAGNOSTIC_MARKERS.iter().any(|m| lowered.contains(m))
}

/// A single answer check
pub trait AnswerRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some(reason)` when the answer must be rejected
    fn check(&self, answer: &str, intent: Intent) -> Option<String>;
}

pub struct NonEmptyRule;

impl AnswerRule for NonEmptyRule {
    fn name(&self) -> &'static str {
        "non_empty"
    }

    fn check(&self, answer: &str, _intent: Intent) -> Option<String> {
        answer
            .trim()
            .is_empty()
            .then(|| "answer is empty".to_string())
    }
}

pub struct DiagnosticLeakRule;

impl AnswerRule for DiagnosticLeakRule {
    fn name(&self) -> &'static str {
        "diagnostic_leak"
    }

    fn check(&self, answer: &str, _intent: Intent) -> Option<String> {
        contains_diagnostic_marker(answer)
            .then(|| "answer leaks internal pipeline fields".to_string())
    }
}

/// Trading answers must be substantive and cite at least one number
pub struct TradingGroundingRule;

impl AnswerRule for TradingGroundingRule {
    fn name(&self) -> &'static str {
        "trading_grounding"
    }

    fn check(&self, answer: &str, intent: Intent) -> Option<String> {
        if intent != Intent::TradingAnalysis {
            return None;
        }
        let trimmed = answer.trim();
        if rune_count(trimmed) < MIN_TRADING_ANSWER_RUNES {
            return Some(format!(
                "trading answer shorter than {} characters",
                MIN_TRADING_ANSWER_RUNES
            ));
        }
        if !trimmed.chars().any(|c| c.is_ascii_digit()) {
            return Some("trading answer cites no figures".to_string());
        }
        None
    }
}

/// Validator that enforces rules in registration order; first rejection wins
pub struct AnswerValidator {
    rules: Vec<Box<dyn AnswerRule>>,
}

impl AnswerValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn AnswerRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, answer: &str, intent: Intent) -> std::result::Result<(), String> {
        for rule in &self.rules {
            if let Some(reason) = rule.check(answer, intent) {
                info!(rule = rule.name(), %intent, "Answer rejected");
                return Err(reason);
            }
        }
        Ok(())
    }
}

impl Default for AnswerValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a validator with the standard answer rules
pub fn create_default_answer_validator() -> AnswerValidator {
    let mut validator = AnswerValidator::new();
    validator.add_rule(Box::new(NonEmptyRule));
    validator.add_rule(Box::new(DiagnosticLeakRule));
    validator.add_rule(Box::new(TradingGroundingRule));
    validator
}

//
// ================= Retry =================
//

/// Generation attempts. There is no state after `Corrective`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Corrective,
}

/// Final answer after validation, with what it took to get there
#[derive(Debug, Clone)]
pub struct ValidatedAnswer {
    pub reply: ProviderReply,
    pub warnings: Vec<String>,
    pub attempt: Attempt,
    /// Model calls issued by the retry (0 or 1)
    pub extra_calls: u32,
}

impl ValidatedAnswer {
    pub fn retried(&self) -> bool {
        self.extra_calls > 0
    }
}

fn corrective_instruction(reason: &str, intent: Intent, locale: Locale) -> String {
    let mut text = match locale {
        Locale::En => format!(
            "Your previous answer was rejected: {}. Rewrite it for the user. \
             Do not mention internal fields, plans or notes.",
            reason
        ),
        Locale::Ru => format!(
            "Предыдущий ответ отклонён: {}. Перепиши ответ для пользователя. \
             Не упоминай внутренние поля, планы или заметки.",
            reason
        ),
    };
    if intent == Intent::TradingAnalysis {
        text.push(' ');
        text.push_str(locale.pick(
            "Ground the answer in the scan rows and quote concrete numbers.",
            "Опирайся на строки скана и приводи конкретные числа.",
        ));
    }
    text
}

/// Validate `first` and, if rejected, issue the one corrective call
pub async fn validate_with_retry(
    provider: &dyn ChatProvider,
    call: &ProviderCall,
    first: ProviderReply,
    validator: &AnswerValidator,
    intent: Intent,
    locale: Locale,
) -> ValidatedAnswer {
    let first_reason = match validator.validate(&first.answer, intent) {
        Ok(()) => {
            return ValidatedAnswer {
                reply: first,
                warnings: Vec::new(),
                attempt: Attempt::Initial,
                extra_calls: 0,
            }
        }
        Err(reason) => reason,
    };

    warn!(reason = %first_reason, "Answer failed validation, issuing corrective retry");

    let mut retry_call = call.clone();
    retry_call.messages.push(HistoryMessage {
        role: MessageRole::Assistant,
        content: first.answer.clone(),
    });
    retry_call.messages.push(HistoryMessage {
        role: MessageRole::User,
        content: corrective_instruction(&first_reason, intent, locale),
    });

    let second_reason = match provider.complete(&retry_call).await {
        Ok(reply) => match validator.validate(&reply.answer, intent) {
            Ok(()) => {
                return ValidatedAnswer {
                    reply,
                    warnings: Vec::new(),
                    attempt: Attempt::Corrective,
                    extra_calls: 1,
                }
            }
            Err(reason) => reason,
        },
        Err(e) => format!("corrective call failed: {}", e),
    };

    warn!(reason = %second_reason, "Corrective retry rejected, keeping original answer");

    ValidatedAnswer {
        reply: first,
        warnings: vec![
            format!("answer validation: {}", first_reason),
            format!("answer validation after retry: {}", second_reason),
        ],
        attempt: Attempt::Corrective,
        extra_calls: 1,
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reply, ScriptedProvider};

    fn call() -> ProviderCall {
        ProviderCall::for_tests("gpt-4o-mini")
    }

    #[test]
    fn test_empty_answer_is_invalid() {
        let validator = create_default_answer_validator();
        for intent in Intent::ALL {
            assert!(validator.validate("   \n", intent).is_err());
        }
    }

    #[test]
    fn test_grounded_trading_answer_is_valid() {
        let validator = create_default_answer_validator();
        let answer = "Top pick is AK-47 Redline with 3.5 profit per unit and moderate volume.";
        assert!(rune_count(answer) >= 60);
        assert!(validator.validate(answer, Intent::TradingAnalysis).is_ok());
    }

    #[test]
    fn test_trading_answer_rules() {
        let validator = create_default_answer_validator();
        assert!(validator.validate("Buy it, 3 units.", Intent::TradingAnalysis).is_err());

        let no_digits = "The strongest rows in the scan look stable and liquid enough to trade today.";
        assert!(validator.validate(no_digits, Intent::TradingAnalysis).is_err());
        // the same text is fine outside trading analysis
        assert!(validator.validate(no_digits, Intent::General).is_ok());
    }

    #[test]
    fn test_marker_rejected_for_every_intent() {
        let validator = create_default_answer_validator();
        let leaked = "Sure! context_level=full, and the best row earns 12.5 with a solid score of 88.";
        for intent in Intent::ALL {
            assert!(validator.validate(leaked, intent).is_err());
        }
        assert!(contains_diagnostic_marker("PREFLIGHT_STATUS: pass"));
    }

    #[tokio::test]
    async fn test_valid_first_answer_makes_no_retry() {
        let provider = ScriptedProvider::new(vec![]);
        let validator = create_default_answer_validator();

        let result = validate_with_retry(
            &provider,
            &call(),
            reply("Hello there"),
            &validator,
            Intent::Smalltalk,
            Locale::En,
        )
        .await;

        assert_eq!(result.attempt, Attempt::Initial);
        assert!(!result.retried());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_replaces_rejected_answer() {
        let fixed = "Row AK-47 Redline leads with 4.2 profit and score 91, ahead of 2 other rows.";
        let provider = ScriptedProvider::new(vec![Ok(reply(fixed))]);
        let validator = create_default_answer_validator();

        let result = validate_with_retry(
            &provider,
            &call(),
            reply("Looks good."),
            &validator,
            Intent::TradingAnalysis,
            Locale::En,
        )
        .await;

        assert_eq!(result.reply.answer, fixed);
        assert!(result.warnings.is_empty());
        assert_eq!(result.extra_calls, 1);

        let sent = provider.last_call().unwrap();
        let tail = &sent.messages[sent.messages.len() - 2..];
        assert_eq!(tail[0].role, MessageRole::Assistant);
        assert_eq!(tail[0].content, "Looks good.");
        assert_eq!(tail[1].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_persistent_failure_keeps_original_with_warnings() {
        let provider = ScriptedProvider::new(vec![Ok(reply(""))]);
        let validator = create_default_answer_validator();

        let result = validate_with_retry(
            &provider,
            &call(),
            reply("Too short"),
            &validator,
            Intent::TradingAnalysis,
            Locale::Ru,
        )
        .await;

        assert_eq!(result.reply.answer, "Too short");
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_error_is_not_fatal() {
        let provider = ScriptedProvider::new(vec![Err(crate::error::AdvisorError::Provider(
            "boom".into(),
        ))]);
        let validator = create_default_answer_validator();

        let result = validate_with_retry(
            &provider,
            &call(),
            reply(""),
            &validator,
            Intent::General,
            Locale::En,
        )
        .await;

        assert_eq!(result.reply.answer, "");
        assert!(result.warnings[1].contains("corrective call failed"));
    }
}
