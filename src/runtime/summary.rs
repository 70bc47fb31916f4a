//! Deterministic account summaries
//!
//! Pure aggregations over orders and transactions; the model only ever sees
//! these figures, never raw ledgers.

use crate::models::{
    ItemTurnover, Order, OrdersSummary, RiskLevel, RiskSummary, TradeFlowSummary, TradeSide,
    Transaction,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

pub const TRADE_FLOW_WINDOW_DAYS: i64 = 30;
pub const TOP_ITEMS: usize = 5;

pub fn summarize_orders(orders: &[Order]) -> OrdersSummary {
    let mut summary = OrdersSummary::default();
    for order in orders {
        match order.side {
            TradeSide::Buy => summary.buy_count += 1,
            TradeSide::Sell => summary.sell_count += 1,
        }
        summary.open_notional += order.price * order.quantity;
    }
    summary
}

/// Drop repeated transaction ids, keeping the first occurrence
pub fn dedupe_transactions(transactions: Vec<Transaction>) -> Vec<Transaction> {
    let mut seen = HashSet::new();
    transactions
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}

fn in_window<'a>(
    transactions: &'a [Transaction],
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a Transaction> {
    let since = now - Duration::days(TRADE_FLOW_WINDOW_DAYS);
    transactions
        .iter()
        .filter(move |t| t.timestamp >= since && t.timestamp <= now)
}

/// Per-item turnover, sorted by turnover then trade count (both descending)
fn item_turnover(transactions: &[Transaction], now: DateTime<Utc>) -> Vec<ItemTurnover> {
    let mut by_item: HashMap<&str, ItemTurnover> = HashMap::new();
    for t in in_window(transactions, now) {
        let entry = by_item.entry(t.item.as_str()).or_insert_with(|| ItemTurnover {
            item: t.item.clone(),
            turnover: 0.0,
            trades: 0,
        });
        entry.turnover += t.price * t.quantity;
        entry.trades += 1;
    }

    let mut items: Vec<ItemTurnover> = by_item.into_values().collect();
    items.sort_by(|a, b| {
        b.turnover
            .total_cmp(&a.turnover)
            .then(b.trades.cmp(&a.trades))
            .then_with(|| a.item.cmp(&b.item))
    });
    items
}

/// Buy/sell flow over the trailing 30 days
pub fn summarize_trade_flow(transactions: &[Transaction], now: DateTime<Utc>) -> TradeFlowSummary {
    let mut summary = TradeFlowSummary {
        window_days: TRADE_FLOW_WINDOW_DAYS,
        ..Default::default()
    };

    for t in in_window(transactions, now) {
        let notional = t.price * t.quantity;
        match t.side {
            TradeSide::Buy => summary.buy_notional += notional,
            TradeSide::Sell => summary.sell_notional += notional,
        }
        summary.trade_count += 1;
    }
    summary.net_flow = summary.sell_notional - summary.buy_notional;

    let mut items = item_turnover(transactions, now);
    items.truncate(TOP_ITEMS);
    summary.top_items = items;
    summary
}

/// Concentration-based portfolio risk over the same window
pub fn summarize_risk(transactions: &[Transaction], now: DateTime<Utc>) -> RiskSummary {
    let items = item_turnover(transactions, now);
    let total: f64 = items.iter().map(|i| i.turnover).sum();
    let top_item_share_pct = match items.first() {
        Some(top) if total > 0.0 => top.turnover / total * 100.0,
        _ => 0.0,
    };

    let flow = summarize_trade_flow(transactions, now);
    let sell_buy_ratio = (flow.buy_notional > 0.0).then(|| flow.sell_notional / flow.buy_notional);

    let level = if items.is_empty() {
        RiskLevel::Low
    } else if top_item_share_pct >= 60.0 || items.len() <= 2 {
        RiskLevel::High
    } else if top_item_share_pct >= 35.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskSummary {
        distinct_items: items.len(),
        top_item_share_pct,
        sell_buy_ratio,
        level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, item: &str, side: TradeSide, price: f64, days_ago: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            item: item.to_string(),
            side,
            price,
            quantity: 1.0,
            timestamp: now() - Duration::days(days_ago),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_orders_summary() {
        let orders = vec![
            Order { item: "a".into(), side: TradeSide::Buy, price: 10.0, quantity: 2.0 },
            Order { item: "b".into(), side: TradeSide::Sell, price: 5.0, quantity: 1.0 },
            Order { item: "c".into(), side: TradeSide::Buy, price: 1.5, quantity: 4.0 },
        ];
        let summary = summarize_orders(&orders);
        assert_eq!(summary.buy_count, 2);
        assert_eq!(summary.sell_count, 1);
        assert_eq!(summary.open_notional, 31.0);
    }

    #[test]
    fn test_trade_flow_window_and_ranking() {
        let txs = vec![
            tx("1", "Knife", TradeSide::Buy, 100.0, 1),
            tx("2", "Knife", TradeSide::Sell, 120.0, 2),
            tx("3", "Gloves", TradeSide::Buy, 50.0, 3),
            tx("4", "Case", TradeSide::Sell, 10.0, 4),
            tx("5", "Case", TradeSide::Sell, 10.0, 5),
            tx("6", "Sticker", TradeSide::Sell, 20.0, 6),
            tx("7", "Old", TradeSide::Buy, 999.0, 45),
        ];

        let flow = summarize_trade_flow(&txs, now());

        assert_eq!(flow.trade_count, 6);
        assert_eq!(flow.buy_notional, 150.0);
        assert_eq!(flow.sell_notional, 160.0);
        assert_eq!(flow.net_flow, 10.0);
        let names: Vec<&str> = flow.top_items.iter().map(|i| i.item.as_str()).collect();
        // Case and Sticker tie on turnover; Case has more trades
        assert_eq!(names, vec!["Knife", "Gloves", "Case", "Sticker"]);
    }

    #[test]
    fn test_top_items_capped() {
        let txs: Vec<Transaction> = (0..8)
            .map(|i| tx(&i.to_string(), &format!("item-{}", i), TradeSide::Buy, 10.0 + i as f64, 1))
            .collect();
        let flow = summarize_trade_flow(&txs, now());
        assert_eq!(flow.top_items.len(), TOP_ITEMS);
        assert_eq!(flow.top_items[0].item, "item-7");
    }

    #[test]
    fn test_dedupe() {
        let txs = vec![
            tx("1", "Knife", TradeSide::Buy, 100.0, 1),
            tx("1", "Knife", TradeSide::Buy, 100.0, 1),
            tx("2", "Case", TradeSide::Sell, 10.0, 1),
        ];
        assert_eq!(dedupe_transactions(txs).len(), 2);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(summarize_risk(&[], now()).level, RiskLevel::Low);

        let concentrated = vec![
            tx("1", "Knife", TradeSide::Buy, 900.0, 1),
            tx("2", "Case", TradeSide::Sell, 50.0, 1),
            tx("3", "Sticker", TradeSide::Sell, 50.0, 1),
        ];
        let risk = summarize_risk(&concentrated, now());
        assert_eq!(risk.level, RiskLevel::High);
        assert!((risk.top_item_share_pct - 90.0).abs() < 1e-9);
        assert_eq!(risk.sell_buy_ratio, Some(100.0 / 900.0));

        let spread: Vec<Transaction> = (0..6)
            .map(|i| tx(&i.to_string(), &format!("item-{}", i), TradeSide::Sell, 10.0, 1))
            .collect();
        let risk = summarize_risk(&spread, now());
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.sell_buy_ratio.is_none());
    }
}
