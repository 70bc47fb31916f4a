//! Context Scoper
//!
//! Trims the client-supplied scan context to what the turn needs:
//! intent defaults first, then the plan's context level, which always wins.

use crate::models::{ContextLevel, ContextPayload, Intent, PlannerPlan};
use crate::request::MAX_CONTEXT_ROWS;

/// Row cap for general questions
pub const GENERAL_ROW_CAP: usize = 12;

/// Scope `context` in place for the given plan
pub fn scope_context(context: &mut ContextPayload, plan: &PlannerPlan) {
    match plan.intent {
        Intent::Smalltalk => {
            context.rows.clear();
            context.summary = None;
        }
        Intent::ProductHelp | Intent::WebResearch => context.rows.clear(),
        Intent::General => context.rows.truncate(GENERAL_ROW_CAP),
        Intent::TradingAnalysis | Intent::DebugSupport => {}
    }

    match plan.context_level {
        ContextLevel::None => {
            context.rows.clear();
            context.summary = None;
        }
        ContextLevel::Summary => context.rows.clear(),
        ContextLevel::Full => context.rows.truncate(MAX_CONTEXT_ROWS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScanRow, ScanSummary};
    use crate::planner::default_plan;

    fn context(rows: usize) -> ContextPayload {
        ContextPayload {
            rows: (0..rows)
                .map(|i| ScanRow {
                    name: format!("item-{}", i),
                    ..Default::default()
                })
                .collect(),
            summary: Some(ScanSummary {
                visible_rows: rows as u64,
                total_rows: rows as u64,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_smalltalk_clears_everything() {
        let mut ctx = context(5);
        scope_context(&mut ctx, &default_plan(Intent::Smalltalk));
        assert!(ctx.rows.is_empty());
        assert!(ctx.summary.is_none());
    }

    #[test]
    fn test_trading_keeps_rows() {
        let mut ctx = context(40);
        scope_context(&mut ctx, &default_plan(Intent::TradingAnalysis));
        assert_eq!(ctx.rows.len(), 40);
        assert!(ctx.summary.is_some());
    }

    #[test]
    fn test_general_with_full_level_is_capped_by_intent() {
        let mut plan = default_plan(Intent::General);
        plan.context_level = ContextLevel::Full;
        let mut ctx = context(40);
        scope_context(&mut ctx, &plan);
        assert_eq!(ctx.rows.len(), GENERAL_ROW_CAP);
    }

    #[test]
    fn test_level_override_wins() {
        // debug support passes rows through, but a summary-level plan drops them
        let mut ctx = context(8);
        scope_context(&mut ctx, &default_plan(Intent::DebugSupport));
        assert!(ctx.rows.is_empty());
        assert!(ctx.summary.is_some());

        let mut plan = default_plan(Intent::DebugSupport);
        plan.context_level = ContextLevel::None;
        let mut ctx = context(8);
        scope_context(&mut ctx, &plan);
        assert!(ctx.rows.is_empty() && ctx.summary.is_none());
    }
}
