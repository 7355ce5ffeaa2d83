//! Trade engine (spec.md §4.9): combines a market's score, its LLM-or-fallback
//! decision, the personality adjustments, and position sizing into a `Trade`
//! ready to open. This module is pure orchestration glue — every input is
//! already computed by `scoring`, `llm`/`fallback`, and `personality`; the
//! only state this module touches is the read-only `AgentPortfolio` passed in.

use super::personality::apply_personality_rules;
use super::primitives::seed as build_seed;
use super::sizing::size_trade;
use super::types::{AgentPortfolio, AgentProfile, ScoredMarket, Side, Trade, TradeStatus};

/// The raw decision before personality/sizing: either from the LLM or the
/// deterministic fallback (spec.md §4.6/§4.7). The trade engine does not care
/// which source produced it — `reasoning` already carries that provenance.
#[derive(Debug, Clone)]
pub struct RawDecision {
    pub side: Side,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuiltTrade {
    pub trade: Trade,
    pub guardrail_flags: Vec<String>,
}

/// Builds a ready-to-open `Trade`, or `None` if the sizing step drops it
/// (clamped size below 1% of capital, spec.md §4.9 step 5). `index` feeds the
/// deterministic seed so repeated candidates within one cycle get distinct,
/// reproducible cache/idempotency keys (spec.md §4.1).
pub fn build_trade(
    agent: &AgentProfile,
    scored: &ScoredMarket,
    decision: RawDecision,
    portfolio: &AgentPortfolio,
    risk_multiplier: Option<f64>,
    index: u64,
    now: i64,
) -> Option<BuiltTrade> {
    let personality = apply_personality_rules(scored, decision.side, decision.confidence);

    let sizing = size_trade(
        agent,
        portfolio,
        scored.market.category,
        personality.confidence,
        personality.size_multiplier,
        risk_multiplier,
    );

    if !sizing.is_tradeable() {
        return None;
    }

    let mut reasoning = decision.reasoning;
    reasoning.extend(personality.notes);

    let seed_str = build_seed(agent.agent_id.as_str(), &scored.market.market_id, index);
    let trade_id = Trade::open_key(agent.agent_id, &scored.market.market_id);

    let trade = Trade {
        trade_id,
        agent_id: agent.agent_id,
        market_id: scored.market.market_id.clone(),
        side: personality.side,
        size_usd: sizing.size_usd,
        entry_probability: scored.market.current_probability,
        entry_score: scored.score,
        confidence: personality.confidence,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: now,
        closed_at: None,
        exit_reason: None,
        reasoning,
        seed: seed_str,
        category: scored.market.category,
    };

    Some(BuiltTrade {
        trade,
        guardrail_flags: sizing.guardrail_flags,
    })
}
