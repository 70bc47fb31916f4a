//! Preflight gate
//!
//! Checks that the scoped context can support the plan before any paid
//! generation call. Hard failures veto generation; soft findings become caveats.

use crate::models::{
    ContextLevel, ContextPayload, Intent, Locale, PlannerPlan, PreflightResult, PreflightStatus,
};
use tracing::info;

/// Evaluate the scoped context against the plan
pub fn run_preflight(
    plan: &PlannerPlan,
    context: &ContextPayload,
    runtime_requested: bool,
    locale: Locale,
) -> PreflightResult {
    let mut missing = Vec::new();
    let mut caveats = Vec::new();

    let is_trading = plan.intent == Intent::TradingAnalysis;
    let rows_empty = context.rows.is_empty();

    if (plan.context_level == ContextLevel::Full || is_trading) && rows_empty {
        missing.push("rows".to_string());
    }

    let visible_rows = context.summary.as_ref().map_or(0, |s| s.visible_rows);
    if is_trading && visible_rows == 0 && rows_empty {
        missing.push("summary.visible_rows".to_string());
    }

    if runtime_requested && !context.runtime.available {
        caveats.push(
            locale
                .pick(
                    "Live account data could not be loaded; account-specific figures may be missing.",
                    "Данные аккаунта загрузить не удалось; цифры по аккаунту могут отсутствовать.",
                )
                .to_string(),
        );
    }

    let status = if !missing.is_empty() {
        PreflightStatus::Fail
    } else if !caveats.is_empty() {
        PreflightStatus::Partial
    } else {
        PreflightStatus::Pass
    };

    info!(?status, ?missing, caveats = caveats.len(), "Preflight completed");

    PreflightResult {
        status,
        missing,
        caveats,
    }
}

/// Deterministic answer for a failed preflight
pub fn refusal_message(result: &PreflightResult, locale: Locale) -> String {
    let fields = result.missing.join(", ");
    match locale {
        Locale::En => format!(
            "I can't analyse this yet: the current scan context is missing {}. \
             Run or refresh a scan so the results are visible, then ask again.",
            fields
        ),
        Locale::Ru => format!(
            "Пока не могу это проанализировать: в контексте скана не хватает {}. \
             Запустите или обновите скан, чтобы результаты были видны, и спросите снова.",
            fields
        ),
    }
}
