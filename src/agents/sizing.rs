//! Trade engine position sizing (spec.md §4.9). Grounded on the donor's
//! `risk.rs` `RiskManager::calculate_position` guardrail-flag accumulation
//! pattern and `vault/kelly.rs`'s fractional sizing with a minimum-size skip
//! reason: this function returns a `SizingOutcome { size_usd, guardrail_flags,
//! skip_reason }` in the same shape rather than a bare `f64`, so callers and
//! tests can see exactly which caps bound the final size.

use super::types::{AgentPortfolio, AgentProfile, Category, RiskLevel};

pub const SINGLE_MARKET_EXPOSURE_CAP: f64 = 0.20;
pub const CATEGORY_EXPOSURE_CAP: f64 = 0.40;
pub const MIN_SIZE_PCT_OF_CAPITAL: f64 = 0.01;

fn base_risk_budget(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::High => 0.04,
        RiskLevel::Medium => 0.025,
        RiskLevel::Low => 0.015,
    }
}

fn total_exposure_cap(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Low => 0.50,
        RiskLevel::Medium => 0.60,
        RiskLevel::High => 0.70,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SizingOutcome {
    pub size_usd: f64,
    pub guardrail_flags: Vec<String>,
    pub skip_reason: Option<String>,
}

impl SizingOutcome {
    pub fn is_tradeable(&self) -> bool {
        self.skip_reason.is_none() && self.size_usd > 0.0
    }
}

/// Sizes a candidate trade against the agent's current portfolio state
/// (spec.md §4.9, steps 1-5; step 6's highest-score-first cap enforcement and
/// step 7's cooldown gate are applied by the caller across the whole
/// candidate list, not per-trade here).
pub fn size_trade(
    agent: &AgentProfile,
    portfolio: &AgentPortfolio,
    category: Category,
    confidence: f64,
    size_multiplier: f64,
    risk_multiplier: Option<f64>,
) -> SizingOutcome {
    let capital = portfolio.current_capital_usd();
    if capital <= 0.0 {
        return SizingOutcome {
            size_usd: 0.0,
            guardrail_flags: vec!["zero_or_negative_capital".to_string()],
            skip_reason: Some("no capital available to size a trade".to_string()),
        };
    }

    let mut guardrail_flags = Vec::new();

    let base = base_risk_budget(agent.risk) * risk_multiplier.unwrap_or(1.0);
    let conf_weight = 0.5 + confidence / 2.0;
    let raw_size = base * conf_weight * capital;
    let after_personality = raw_size * size_multiplier;

    let single_market_cap = capital * SINGLE_MARKET_EXPOSURE_CAP;
    let mut size = after_personality;
    if size > single_market_cap {
        guardrail_flags.push("single_market_cap".to_string());
        size = single_market_cap;
    }

    let existing_category_exposure = portfolio.category_exposure_usd(category);
    let category_cap = capital * CATEGORY_EXPOSURE_CAP;
    let category_room = (category_cap - existing_category_exposure).max(0.0);
    if size > category_room {
        guardrail_flags.push("category_cap".to_string());
        size = size.min(category_room);
    }

    let existing_total_exposure = portfolio.total_open_exposure_usd();
    let total_cap = capital * total_exposure_cap(agent.risk);
    let total_room = (total_cap - existing_total_exposure).max(0.0);
    if size > total_room {
        guardrail_flags.push("total_exposure_cap".to_string());
        size = size.min(total_room);
    }

    size = size.max(0.0);

    let min_size = capital * MIN_SIZE_PCT_OF_CAPITAL;
    if size < min_size {
        return SizingOutcome {
            size_usd: 0.0,
            guardrail_flags,
            skip_reason: Some(format!(
                "sized trade ${:.2} below minimum ${:.2} (1% of capital)",
                size, min_size
            )),
        };
    }

    SizingOutcome {
        size_usd: size,
        guardrail_flags,
        skip_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{AgentId, Position, ScoreWeights, Side};

    fn agent(risk: RiskLevel) -> AgentProfile {
        AgentProfile {
            agent_id: AgentId::Grok4,
            display_name: "Test".into(),
            risk,
            min_volume: 0.0,
            min_liquidity: 0.0,
            max_trades: 5,
            focus_categories: vec![],
            weights: ScoreWeights {
                volume: 1.0,
                liquidity: 1.0,
                price_movement: 1.0,
                news: 1.0,
                probability: 1.0,
            },
            enabled: true,
        }
    }

    #[test]
    fn sizes_within_single_market_cap() {
        let portfolio = AgentPortfolio::new(AgentId::Grok4, 3000.0);
        let outcome = size_trade(&agent(RiskLevel::High), &portfolio, Category::Crypto, 0.95, 1.5, None);
        assert!(outcome.size_usd <= 3000.0 * SINGLE_MARKET_EXPOSURE_CAP + 1e-9);
    }

    #[test]
    fn drops_trade_below_minimum_size() {
        let portfolio = AgentPortfolio::new(AgentId::Grok4, 3000.0);
        let outcome = size_trade(&agent(RiskLevel::Low), &portfolio, Category::Crypto, 0.01, 0.5, None);
        assert!(!outcome.is_tradeable());
        assert!(outcome.skip_reason.is_some());
    }

    #[test]
    fn category_cap_limits_concentrated_exposure() {
        let mut portfolio = AgentPortfolio::new(AgentId::Grok4, 3000.0);
        portfolio.open_positions.insert(
            "existing".to_string(),
            Position {
                market_id: "existing".into(),
                side: Side::Yes,
                size_usd: 1_190.0,
                entry_probability: 0.5,
                entry_score: 50.0,
                opened_at: 0,
                category: Category::Crypto,
            },
        );
        let outcome = size_trade(&agent(RiskLevel::High), &portfolio, Category::Crypto, 0.95, 1.5, None);
        assert!(outcome.guardrail_flags.contains(&"category_cap".to_string()));
        assert!(outcome.size_usd <= 10.0 + 1e-6);
    }

    #[test]
    fn risk_multiplier_scales_base_budget() {
        let portfolio = AgentPortfolio::new(AgentId::Grok4, 3000.0);
        let boosted = size_trade(&agent(RiskLevel::Medium), &portfolio, Category::Tech, 0.7, 1.0, Some(1.5));
        let baseline = size_trade(&agent(RiskLevel::Medium), &portfolio, Category::Tech, 0.7, 1.0, Some(1.0));
        assert!(boosted.size_usd > baseline.size_usd);
    }
}
