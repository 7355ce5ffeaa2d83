//! Adaptive tuner (spec.md §4.13): a slow, daily background job that adjusts
//! each agent's risk multiplier and category bias from its last 30 days of
//! closed trades. Pure computation over a trade slice; the caller (the
//! scheduler's background loop) owns persistence and the 24h cadence.

use std::collections::HashMap;

use super::types::{AdaptiveConfig, AgentId, Category, CategoryBias, Trade, TradeStatus};

const LOOKBACK_DAYS: i64 = 30;
const CATEGORY_BIAS_SCALE_USD: f64 = 50.0;

#[derive(Debug, Clone, Default)]
struct CategoryAccumulator {
    sum_pnl: f64,
    count: usize,
}

/// Filters to closed trades whose `closedAt` falls within the last 30 days
/// (spec.md §4.13 step 1).
pub fn closed_trades_in_window<'a>(trades: &'a [Trade], now_ms: i64) -> Vec<&'a Trade> {
    let since = now_ms - LOOKBACK_DAYS * 24 * 3600 * 1000;
    trades
        .iter()
        .filter(|t| t.status == TradeStatus::Closed)
        .filter(|t| t.closed_at.map(|c| c >= since).unwrap_or(false))
        .collect()
}

/// `pnlPct30d` relative to the agent's starting capital (spec.md §4.13 step 2).
pub fn pnl_pct_30d(closed: &[&Trade], starting_capital_usd: f64) -> f64 {
    if starting_capital_usd <= 0.0 {
        return 0.0;
    }
    let total_pnl: f64 = closed.iter().filter_map(|t| t.pnl_usd).sum();
    total_pnl / starting_capital_usd * 100.0
}

/// Worst post-peak dip of the cumulative realized-PnL path over the window
/// (spec.md §4.13 step 2, §9: "approximated as worst post-peak dip").
pub fn max_drawdown_pct_30d(closed: &[&Trade], starting_capital_usd: f64) -> f64 {
    if starting_capital_usd <= 0.0 {
        return 0.0;
    }
    let mut ordered = closed.to_vec();
    ordered.sort_by_key(|t| t.closed_at.unwrap_or(0));

    let mut equity = starting_capital_usd;
    let mut peak = starting_capital_usd;
    let mut worst_dip_pct = 0.0;

    for trade in ordered {
        equity += trade.pnl_usd.unwrap_or(0.0);
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dip = (peak - equity) / peak;
            if dip > worst_dip_pct {
                worst_dip_pct = dip;
            }
        }
    }

    worst_dip_pct
}

/// Per-category `(sumPnl, count)` over the window (spec.md §4.13 step 2).
fn per_category_stats(closed: &[&Trade]) -> HashMap<Category, CategoryAccumulator> {
    let mut acc: HashMap<Category, CategoryAccumulator> = HashMap::new();
    for trade in closed {
        let entry = acc.entry(trade.category).or_default();
        entry.sum_pnl += trade.pnl_usd.unwrap_or(0.0);
        entry.count += 1;
    }
    acc
}

/// `riskMultiplier` recomputation (spec.md §4.13 step 3).
pub fn compute_risk_multiplier(pnl_pct: f64, drawdown_pct: f64) -> f64 {
    let multiplier = if drawdown_pct > 0.35 || pnl_pct < -10.0 {
        0.75
    } else if pnl_pct > 25.0 && drawdown_pct < 0.25 {
        1.10
    } else {
        1.0
    };
    multiplier.clamp(0.5, 1.5)
}

/// `categoryBias[c]` recomputation (spec.md §4.13 step 4): every category
/// gets a bias, defaulting to 1.0 when the agent had no closed trades in it
/// this window.
pub fn compute_category_bias(closed: &[&Trade]) -> CategoryBias {
    let stats = per_category_stats(closed);
    let mut map = HashMap::new();
    for category in Category::ALL {
        let bias = match stats.get(&category) {
            Some(acc) if acc.count > 0 => {
                let avg_pnl_per_trade = acc.sum_pnl / acc.count as f64;
                (1.0 + (avg_pnl_per_trade / CATEGORY_BIAS_SCALE_USD) * 0.3).clamp(0.7, 1.3)
            }
            _ => 1.0,
        };
        map.insert(category, bias);
    }
    CategoryBias(map)
}

/// Runs the full tuning pass for one agent and returns the `AdaptiveConfig`
/// plus `CategoryBias` ready to persist and atomically swap in (spec.md
/// §4.13 step 5).
pub fn tune_agent(agent_id: AgentId, trades: &[Trade], starting_capital_usd: f64, now_ms: i64) -> (AdaptiveConfig, CategoryBias) {
    let closed = closed_trades_in_window(trades, now_ms);
    let pnl_pct = pnl_pct_30d(&closed, starting_capital_usd);
    let drawdown_pct = max_drawdown_pct_30d(&closed, starting_capital_usd);

    let config = AdaptiveConfig {
        agent_id,
        risk_multiplier: compute_risk_multiplier(pnl_pct, drawdown_pct),
        computed_at: now_ms,
    };
    let bias = compute_category_bias(&closed);

    (config, bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{ExitReason, Side};

    fn closed_trade(category: Category, pnl: f64, closed_at: i64) -> Trade {
        Trade {
            trade_id: format!("t-{closed_at}"),
            agent_id: AgentId::Grok4,
            market_id: "m".into(),
            side: Side::Yes,
            size_usd: 100.0,
            entry_probability: 0.5,
            entry_score: 50.0,
            confidence: 0.6,
            status: TradeStatus::Closed,
            pnl_usd: Some(pnl),
            opened_at: closed_at - 1000,
            closed_at: Some(closed_at),
            exit_reason: Some(ExitReason::TakeProfit),
            reasoning: vec![],
            seed: "seed".into(),
            category,
        }
    }

    #[test]
    fn risk_multiplier_cuts_on_large_drawdown() {
        assert_eq!(compute_risk_multiplier(5.0, 0.40), 0.75);
    }

    #[test]
    fn risk_multiplier_cuts_on_deep_losses() {
        assert_eq!(compute_risk_multiplier(-15.0, 0.10), 0.75);
    }

    #[test]
    fn risk_multiplier_boosts_on_strong_performance() {
        assert_eq!(compute_risk_multiplier(30.0, 0.10), 1.10);
    }

    #[test]
    fn risk_multiplier_defaults_to_unity() {
        assert_eq!(compute_risk_multiplier(5.0, 0.10), 1.0);
    }

    #[test]
    fn category_bias_rewards_profitable_category() {
        let now = 100_000_000;
        let trades = vec![
            closed_trade(Category::Crypto, 100.0, now - 1000),
            closed_trade(Category::Crypto, 100.0, now - 2000),
        ];
        let closed: Vec<&Trade> = trades.iter().collect();
        let bias = compute_category_bias(&closed);
        assert!(bias.get(Category::Crypto) > 1.0);
        assert_eq!(bias.get(Category::Sports), 1.0);
    }

    #[test]
    fn category_bias_is_clamped() {
        let now = 100_000_000;
        let trades = vec![closed_trade(Category::Crypto, 100_000.0, now - 1000)];
        let closed: Vec<&Trade> = trades.iter().collect();
        let bias = compute_category_bias(&closed);
        assert_eq!(bias.get(Category::Crypto), 1.3);
    }

    #[test]
    fn window_excludes_trades_closed_outside_30_days() {
        let now = 100 * 24 * 3600 * 1000_i64;
        let old = closed_trade(Category::Crypto, 50.0, now - 40 * 24 * 3600 * 1000);
        let recent = closed_trade(Category::Crypto, 50.0, now - 1 * 24 * 3600 * 1000);
        let trades = vec![old, recent];
        let windowed = closed_trades_in_window(&trades, now);
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn max_drawdown_tracks_worst_post_peak_dip() {
        let now = 100_000_000;
        let trades = vec![
            closed_trade(Category::Crypto, 500.0, now - 3000), // peak
            closed_trade(Category::Crypto, -300.0, now - 2000), // dip
            closed_trade(Category::Crypto, 100.0, now - 1000),
        ];
        let closed: Vec<&Trade> = trades.iter().collect();
        let dd = max_drawdown_pct_30d(&closed, 3000.0);
        assert!(dd > 0.0);
    }
}
