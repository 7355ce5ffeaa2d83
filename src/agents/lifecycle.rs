//! Lifecycle: exits and flips (spec.md §4.10). Pure decision functions over a
//! `Position` plus the market's latest state; the scheduler (§4.12) is the
//! only caller that actually mutates a `Trade`/`AgentPortfolio`. `ExitReason`
//! mirrors the donor's `ExitReason` enum in `vault/unified_15m_strategy.rs`,
//! renamed to the market-agnostic tags spec.md §3 names.

use super::types::{ExitReason, Market, MarketStatus, Position, Side, TimestampMs};

pub const TAKE_PROFIT_YES: f64 = 0.85;
pub const TAKE_PROFIT_NO: f64 = 0.15;
pub const STOP_LOSS_YES: f64 = 0.35;
pub const STOP_LOSS_NO: f64 = 0.65;
pub const TIMEOUT_HOURS: f64 = 72.0;
pub const SCORE_DECAY_FACTOR: f64 = 0.5;
/// Floor on `entryScore` below which score-decay is never evaluated, per
/// spec.md §9's open question: "implementers should confirm against the
/// product definition" — resolved in DESIGN.md as a floor of 10 to avoid
/// divide-by-near-zero behavior.
pub const SCORE_DECAY_ENTRY_FLOOR: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct ExitEvaluation {
    pub reason: ExitReason,
    /// The probability to mark the close at. For `MarketInvalid` this is
    /// meaningless (PnL is forced to 0 regardless); callers must special-case it.
    pub exit_probability: f64,
}

/// Evaluates every exit condition in the priority order spec.md §4.10 lists
/// them: market-status overrides first (RESOLVED/FROZEN/INVALID), then the
/// probability-based TP/SL, then score decay, then the timeout backstop.
/// Returns `None` if the position should remain open this cycle.
pub fn evaluate_exit(
    position: &Position,
    market: &Market,
    latest_score: Option<f64>,
    now: TimestampMs,
) -> Option<ExitEvaluation> {
    match market.status {
        MarketStatus::Resolved => {
            // spec.md §9 open question, resolved in DESIGN.md: when the
            // upstream exposes a known outcome, close at that outcome tagged
            // MANUAL (a resolution is not a strategy-triggered exit); when
            // the outcome is unknown, degrade to MARKET_INVALID's flat-PnL
            // semantics rather than guess a probability.
            return Some(match market.resolved_outcome {
                Some(outcome) => ExitEvaluation {
                    reason: ExitReason::Manual,
                    exit_probability: outcome,
                },
                None => ExitEvaluation {
                    reason: ExitReason::MarketInvalid,
                    exit_probability: position.entry_probability,
                },
            });
        }
        MarketStatus::Invalid => {
            return Some(ExitEvaluation {
                reason: ExitReason::MarketInvalid,
                exit_probability: position.entry_probability,
            });
        }
        MarketStatus::Frozen => {
            // Hold per spec.md §4.10 default config ("hold or flat-close per
            // config"); this engine's default config holds through a freeze.
            return None;
        }
        MarketStatus::Active => {}
    }

    let p = market.current_probability;
    let hit_take_profit = match position.side {
        Side::Yes => p >= TAKE_PROFIT_YES,
        Side::No => p <= TAKE_PROFIT_NO,
    };
    if hit_take_profit {
        return Some(ExitEvaluation {
            reason: ExitReason::TakeProfit,
            exit_probability: p,
        });
    }

    let hit_stop_loss = match position.side {
        Side::Yes => p <= STOP_LOSS_YES,
        Side::No => p >= STOP_LOSS_NO,
    };
    if hit_stop_loss {
        return Some(ExitEvaluation {
            reason: ExitReason::StopLoss,
            exit_probability: p,
        });
    }

    if let Some(score) = latest_score {
        if position.entry_score >= SCORE_DECAY_ENTRY_FLOOR && score < SCORE_DECAY_FACTOR * position.entry_score {
            return Some(ExitEvaluation {
                reason: ExitReason::ScoreDecay,
                exit_probability: p,
            });
        }
    }

    let age_hours = ((now - position.opened_at).max(0) as f64) / (1000.0 * 3600.0);
    if age_hours >= TIMEOUT_HOURS {
        return Some(ExitEvaluation {
            reason: ExitReason::Timeout,
            exit_probability: p,
        });
    }

    None
}

/// PnL on close (spec.md §4.10): `direction * (exitOrCurrent - entry) * size`,
/// except a resolved market with a known outcome, and `MARKET_INVALID` which
/// is always flat (spec.md §9 open question, resolved as: unknown-outcome
/// RESOLVED markets fall back to `MARKET_INVALID` semantics — flat PnL).
pub fn realized_pnl(position: &Position, evaluation: &ExitEvaluation) -> f64 {
    if evaluation.reason == ExitReason::MarketInvalid {
        return 0.0;
    }
    position.side.direction() * (evaluation.exit_probability - position.entry_probability) * position.size_usd
}

/// Unrealized PnL for metrics only (spec.md §4.10): same formula with the
/// market's current probability standing in for the exit probability.
pub fn unrealized_pnl(position: &Position, current_probability: f64) -> f64 {
    position.side.direction() * (current_probability - position.entry_probability) * position.size_usd
}

/// Whether opening the opposite side should flip an existing position
/// (spec.md §4.10): the new decision's side disagrees with the held side and
/// its confidence clears the configured threshold.
pub fn should_flip(position: &Position, candidate_side: Side, candidate_confidence: f64, flip_threshold: f64) -> bool {
    candidate_side != position.side && candidate_confidence > flip_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::Category;

    fn position(side: Side, entry_probability: f64, entry_score: f64, opened_at: TimestampMs) -> Position {
        Position {
            market_id: "m1".into(),
            side,
            size_usd: 100.0,
            entry_probability,
            entry_score,
            opened_at,
            category: Category::Crypto,
        }
    }

    fn market(probability: f64, status: MarketStatus, resolved_outcome: Option<f64>) -> Market {
        Market {
            market_id: "m1".into(),
            question: "q".into(),
            category: Category::Crypto,
            volume_usd: 100_000.0,
            liquidity_usd: 20_000.0,
            current_probability: probability,
            price_change_24h: 0.0,
            status,
            resolved_outcome,
        }
    }

    #[test]
    fn take_profit_yes_at_threshold() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.90, MarketStatus::Active, None);
        let eval = evaluate_exit(&pos, &mkt, None, 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::TakeProfit);
        assert_eq!(realized_pnl(&pos, &eval), 40.0);
    }

    #[test]
    fn stop_loss_yes() {
        let pos = position(Side::Yes, 0.60, 50.0, 0);
        let mkt = market(0.30, MarketStatus::Active, None);
        let eval = evaluate_exit(&pos, &mkt, None, 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::StopLoss);
        assert_eq!(realized_pnl(&pos, &eval), -60.0);
    }

    #[test]
    fn timeout_fires_after_72_hours() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.55, MarketStatus::Active, None);
        let just_under = (71.0 * 3600.0 * 1000.0) as i64;
        let just_over = (72.5 * 3600.0 * 1000.0) as i64;
        assert!(evaluate_exit(&pos, &mkt, None, just_under).is_none());
        assert_eq!(evaluate_exit(&pos, &mkt, None, just_over).unwrap().reason, ExitReason::Timeout);
    }

    #[test]
    fn score_decay_requires_floor_on_entry_score() {
        let pos = position(Side::Yes, 0.50, 5.0, 0);
        let mkt = market(0.55, MarketStatus::Active, None);
        assert!(evaluate_exit(&pos, &mkt, Some(1.0), 1_000).is_none());

        let pos2 = position(Side::Yes, 0.50, 50.0, 0);
        let eval = evaluate_exit(&pos2, &mkt, Some(20.0), 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::ScoreDecay);
    }

    #[test]
    fn invalid_market_closes_flat() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.99, MarketStatus::Invalid, None);
        let eval = evaluate_exit(&pos, &mkt, None, 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::MarketInvalid);
        assert_eq!(realized_pnl(&pos, &eval), 0.0);
    }

    #[test]
    fn resolved_market_with_known_outcome_pays_full_pnl() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.99, MarketStatus::Resolved, Some(1.0));
        let eval = evaluate_exit(&pos, &mkt, None, 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::Manual);
        assert_eq!(realized_pnl(&pos, &eval), 50.0);
    }

    #[test]
    fn resolved_market_without_known_outcome_closes_flat() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.99, MarketStatus::Resolved, None);
        let eval = evaluate_exit(&pos, &mkt, None, 1_000).unwrap();
        assert_eq!(eval.reason, ExitReason::MarketInvalid);
        assert_eq!(realized_pnl(&pos, &eval), 0.0);
    }

    #[test]
    fn frozen_market_holds_by_default() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        let mkt = market(0.99, MarketStatus::Frozen, None);
        assert!(evaluate_exit(&pos, &mkt, None, 1_000).is_none());
    }

    #[test]
    fn flip_requires_opposite_side_and_confidence_above_threshold() {
        let pos = position(Side::Yes, 0.50, 50.0, 0);
        assert!(!should_flip(&pos, Side::Yes, 0.99, 0.60));
        assert!(!should_flip(&pos, Side::No, 0.55, 0.60));
        assert!(should_flip(&pos, Side::No, 0.70, 0.60));
    }
}
