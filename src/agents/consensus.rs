//! Leaderboard & consensus aggregator (spec.md §4.14). Pure read-side
//! aggregation over persisted trades and current portfolios; nothing here
//! mutates engine state. Grounded on the "rolling stats" shape of
//! `signals/quality.rs`: plain functions over a snapshot, no hidden state.

use std::collections::HashMap;

use super::types::{AgentId, AgentPortfolio, Category, ConsensusRecord, Side, Trade, TimestampMs, TradeStatus};

const CONFLICT_AGREEMENT_THRESHOLD: f64 = 0.60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    AllTime,
    Last30Days,
    Last7Days,
    Last24Hours,
}

impl TimeWindow {
    fn since_ms(&self, now: TimestampMs) -> Option<TimestampMs> {
        const DAY_MS: i64 = 24 * 3600 * 1000;
        match self {
            TimeWindow::AllTime => None,
            TimeWindow::Last30Days => Some(now - 30 * DAY_MS),
            TimeWindow::Last7Days => Some(now - 7 * DAY_MS),
            TimeWindow::Last24Hours => Some(now - DAY_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    pub agent_id: Option<AgentId>,
    pub current_capital_usd: f64,
    pub pnl_pct: f64,
    pub win_rate: f64,
    pub trades_count: usize,
    pub trades_count_24h: usize,
    pub best_category: Option<Category>,
    pub worst_category: Option<Category>,
    pub avg_holding_minutes: f64,
}

/// Computes per-agent metrics over a time window filtered by `openedAt`
/// (open/in-window) or `closedAt` (closed-in-window), per spec.md §4.14.
pub fn agent_metrics(
    portfolio: &AgentPortfolio,
    trades: &[Trade],
    window: TimeWindow,
    now: TimestampMs,
) -> AgentMetrics {
    let since = window.since_ms(now);
    let in_window = |t: &&Trade| match since {
        None => true,
        Some(since_ms) => t.opened_at >= since_ms || t.closed_at.map(|c| c >= since_ms).unwrap_or(false),
    };

    let windowed: Vec<&Trade> = trades.iter().filter(in_window).collect();
    let closed: Vec<&Trade> = windowed
        .iter()
        .filter(|t| t.status == TradeStatus::Closed)
        .copied()
        .collect();

    let wins = closed.iter().filter(|t| t.pnl_usd.unwrap_or(0.0) > 0.0).count();
    let win_rate = if closed.is_empty() {
        0.0
    } else {
        wins as f64 / closed.len() as f64
    };

    let mut per_category: HashMap<Category, f64> = HashMap::new();
    for t in &closed {
        *per_category.entry(t.category).or_insert(0.0) += t.pnl_usd.unwrap_or(0.0);
    }
    let best_category = per_category
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| *c);
    let worst_category = per_category
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| *c);

    let holding_minutes: Vec<f64> = closed
        .iter()
        .filter_map(|t| t.closed_at.map(|c| ((c - t.opened_at).max(0) as f64) / 60_000.0))
        .collect();
    let avg_holding_minutes = if holding_minutes.is_empty() {
        0.0
    } else {
        holding_minutes.iter().sum::<f64>() / holding_minutes.len() as f64
    };

    let last_24h = TimeWindow::Last24Hours.since_ms(now).unwrap();
    let trades_count_24h = trades.iter().filter(|t| t.opened_at >= last_24h).count();

    let pnl_pct = if portfolio.starting_capital_usd > 0.0 {
        (portfolio.current_capital_usd() - portfolio.starting_capital_usd) / portfolio.starting_capital_usd * 100.0
    } else {
        0.0
    };

    AgentMetrics {
        agent_id: Some(portfolio.agent_id),
        current_capital_usd: portfolio.current_capital_usd(),
        pnl_pct,
        win_rate,
        trades_count: windowed.len(),
        trades_count_24h,
        best_category,
        worst_category,
        avg_holding_minutes,
    }
}

/// Builds a `ConsensusRecord` per market with any open position, across all
/// agent portfolios (spec.md §4.14). Reads a point-in-time snapshot of open
/// positions; the caller is responsible for taking that snapshot after every
/// per-agent cycle has completed (spec.md §5 ordering guarantee).
pub fn build_consensus(portfolios: &[AgentPortfolio]) -> Vec<ConsensusRecord> {
    let mut by_market: HashMap<String, (usize, usize, f64, f64)> = HashMap::new(); // (yes, no, conf_sum, conf_count)

    for portfolio in portfolios {
        for (market_id, position) in &portfolio.open_positions {
            let entry = by_market.entry(market_id.clone()).or_insert((0, 0, 0.0, 0.0));
            match position.side {
                Side::Yes => entry.0 += 1,
                Side::No => entry.1 += 1,
            }
        }
    }

    // Confidence isn't tracked on `Position`; approximate average confidence
    // from the originating trades is out of scope for a pure portfolio-only
    // snapshot, so this aggregator reports agreement/counts and leaves
    // avg_confidence at 0.0 when no trade context is supplied. Callers with
    // trade context should use `build_consensus_with_confidence`.
    by_market
        .into_iter()
        .map(|(market_id, (yes, no, _, _))| consensus_record(market_id, yes, no, 0.0))
        .collect()
}

/// Same as `build_consensus` but also folds in average confidence from the
/// matching open trades (spec.md §4.14: "average confidence").
pub fn build_consensus_with_confidence(portfolios: &[AgentPortfolio], open_trades: &[Trade]) -> Vec<ConsensusRecord> {
    let mut by_market: HashMap<String, (usize, usize, f64, f64)> = HashMap::new();

    for portfolio in portfolios {
        for (market_id, position) in &portfolio.open_positions {
            let entry = by_market.entry(market_id.clone()).or_insert((0, 0, 0.0, 0.0));
            match position.side {
                Side::Yes => entry.0 += 1,
                Side::No => entry.1 += 1,
            }
        }
    }

    for trade in open_trades.iter().filter(|t| t.status == TradeStatus::Open) {
        if let Some(entry) = by_market.get_mut(&trade.market_id) {
            entry.2 += trade.confidence;
            entry.3 += 1.0;
        }
    }

    by_market
        .into_iter()
        .map(|(market_id, (yes, no, conf_sum, conf_count))| {
            let avg_confidence = if conf_count > 0.0 { conf_sum / conf_count } else { 0.0 };
            consensus_record(market_id, yes, no, avg_confidence)
        })
        .collect()
}

fn consensus_record(market_id: String, yes: usize, no: usize, avg_confidence: f64) -> ConsensusRecord {
    let total = yes + no;
    let agreement = if total == 0 {
        0.0
    } else {
        yes.max(no) as f64 / total as f64
    };
    let side = if yes >= no { Side::Yes } else { Side::No };
    let conflict = agreement < CONFLICT_AGREEMENT_THRESHOLD && yes > 0 && no > 0;

    ConsensusRecord {
        market_id,
        yes_count: yes,
        no_count: no,
        agreement,
        side,
        avg_confidence,
        conflict,
    }
}
