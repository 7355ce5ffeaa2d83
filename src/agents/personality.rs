//! Personality rules (spec.md §4.8): deterministic post-decision modifiers
//! applied in a fixed order per agent. Each rule is a pure function over
//! already-computed values — it may not call upstreams or look anything up,
//! only adjust `side` / `confidence` / `size_multiplier` and append a note to
//! `reasoning`. Grounded on the guardrail-flag accumulation pattern in
//! `risk.rs`'s `RiskManager::calculate_position`: a fixed pipeline of checks,
//! each either a no-op or an adjustment plus a tag explaining why.

use super::primitives::clamp;
use super::types::{Category, ScoredMarket, Side};

pub const CONFIDENCE_DELTA_BOUND: f64 = 0.15;
pub const SIZE_MULTIPLIER_MIN: f64 = 0.5;
pub const SIZE_MULTIPLIER_MAX: f64 = 1.5;

/// Input available to every personality rule: the scored market plus the
/// side/confidence the engine has computed so far this trade. Rules never see
/// the agent's portfolio or caches — only what has already been decided.
#[derive(Debug, Clone, Copy)]
pub struct PersonalityContext<'a> {
    pub scored: &'a ScoredMarket,
    pub side: Side,
    pub confidence: f64,
}

/// One rule's output. `None` fields mean "no change" for that dimension.
#[derive(Debug, Clone, Default)]
pub struct PersonalityAdjustment {
    pub side: Option<Side>,
    pub confidence_delta: Option<f64>,
    pub size_multiplier: Option<f64>,
    pub note: Option<String>,
}

/// momentum-near-50-in-Crypto/Tech: a market hovering near a coin flip, in a
/// volatile category, with a meaningful 24h swing already underway, is read
/// as early momentum building — boost confidence and size.
fn momentum_near_50(ctx: &PersonalityContext) -> PersonalityAdjustment {
    let m = &ctx.scored.market;
    let in_focus_category = matches!(m.category, Category::Crypto | Category::Tech);
    let near_50 = (m.current_probability - 0.5).abs() <= 0.10;
    let has_momentum = m.price_change_24h.abs() >= 0.05;

    if in_focus_category && near_50 && has_momentum {
        PersonalityAdjustment {
            side: None,
            confidence_delta: Some(0.05),
            size_multiplier: Some(1.15),
            note: Some("momentum near 50% in a crypto/tech market".to_string()),
        }
    } else {
        PersonalityAdjustment::default()
    }
}

/// crowded one-sided political markets with heavy news: a political market
/// that has already priced in a lopsided outcome, with heavy news coverage
/// pushing it further, is read as crowded — reduce confidence and size rather
/// than chase consensus.
fn crowded_one_sided_political(ctx: &PersonalityContext) -> PersonalityAdjustment {
    let m = &ctx.scored.market;
    let is_political = m.category == Category::Politics;
    let one_sided = m.current_probability >= 0.80 || m.current_probability <= 0.20;
    let heavy_news = ctx.scored.components.news_score >= 20.0;

    if is_political && one_sided && heavy_news {
        PersonalityAdjustment {
            side: None,
            confidence_delta: Some(-0.07),
            size_multiplier: Some(0.85),
            note: Some("crowded, one-sided political market with heavy news".to_string()),
        }
    } else {
        PersonalityAdjustment::default()
    }
}

/// near-term sports event: a sports market already moving sharply in the 24h
/// window reads as a near-term event repricing fast — boost moderately.
fn near_term_sports(ctx: &PersonalityContext) -> PersonalityAdjustment {
    let m = &ctx.scored.market;
    let is_sports = m.category == Category::Sports;
    let moving_fast = m.price_change_24h.abs() >= 0.08;

    if is_sports && moving_fast {
        PersonalityAdjustment {
            side: None,
            confidence_delta: Some(0.04),
            size_multiplier: Some(1.10),
            note: Some("near-term sports event repricing quickly".to_string()),
        }
    } else {
        PersonalityAdjustment::default()
    }
}

/// The complete, fixed-order v1 rule set (spec.md §4.8: "Examples (complete
/// v1 set)").
const RULES: &[fn(&PersonalityContext) -> PersonalityAdjustment] = &[
    momentum_near_50,
    crowded_one_sided_political,
    near_term_sports,
];

#[derive(Debug, Clone)]
pub struct PersonalityResult {
    pub side: Side,
    pub confidence: f64,
    pub size_multiplier: f64,
    pub notes: Vec<String>,
}

/// Applies every rule in fixed order, clamping each delta and the cumulative
/// size multiplier to the global bounds (spec.md §4.8).
pub fn apply_personality_rules(scored: &ScoredMarket, side: Side, confidence: f64) -> PersonalityResult {
    let mut current_side = side;
    let mut current_confidence = confidence;
    let mut size_multiplier = 1.0;
    let mut notes = Vec::new();

    for rule in RULES {
        let ctx = PersonalityContext {
            scored,
            side: current_side,
            confidence: current_confidence,
        };
        let adj = rule(&ctx);

        if let Some(new_side) = adj.side {
            current_side = new_side;
        }
        if let Some(delta) = adj.confidence_delta {
            let bounded = clamp(delta, -CONFIDENCE_DELTA_BOUND, CONFIDENCE_DELTA_BOUND);
            current_confidence = clamp(current_confidence + bounded, 0.0, 1.0);
        }
        if let Some(mult) = adj.size_multiplier {
            size_multiplier *= mult;
        }
        if let Some(note) = adj.note {
            notes.push(note);
        }
    }

    size_multiplier = clamp(size_multiplier, SIZE_MULTIPLIER_MIN, SIZE_MULTIPLIER_MAX);

    PersonalityResult {
        side: current_side,
        confidence: current_confidence,
        size_multiplier,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{Category, Market, MarketStatus, ScoreComponents};

    fn market(category: Category, probability: f64, price_change_24h: f64) -> ScoredMarket {
        ScoredMarket {
            market: Market {
                market_id: "m1".into(),
                question: "q".into(),
                category,
                volume_usd: 100_000.0,
                liquidity_usd: 20_000.0,
                current_probability: probability,
                price_change_24h,
                status: MarketStatus::Active,
                resolved_outcome: None,
            },
            score: 50.0,
            components: ScoreComponents::default(),
        }
    }

    #[test]
    fn momentum_rule_boosts_crypto_near_50_with_movement() {
        let scored = market(Category::Crypto, 0.48, 0.07);
        let result = apply_personality_rules(&scored, Side::Yes, 0.60);
        assert!(result.confidence > 0.60);
        assert!(result.size_multiplier > 1.0);
        assert!(!result.notes.is_empty());
    }

    #[test]
    fn political_one_sided_rule_requires_heavy_news() {
        let mut scored = market(Category::Politics, 0.90, 0.0);
        scored.components.news_score = 5.0;
        let result = apply_personality_rules(&scored, Side::Yes, 0.70);
        assert_eq!(result.confidence, 0.70);
        assert_eq!(result.size_multiplier, 1.0);
    }

    #[test]
    fn political_one_sided_rule_fires_with_heavy_news() {
        let mut scored = market(Category::Politics, 0.90, 0.0);
        scored.components.news_score = 22.0;
        let result = apply_personality_rules(&scored, Side::Yes, 0.70);
        assert!(result.confidence < 0.70);
        assert!(result.size_multiplier < 1.0);
    }

    #[test]
    fn size_multiplier_is_clamped_to_bounds() {
        let scored = market(Category::Crypto, 0.50, 0.20);
        let result = apply_personality_rules(&scored, Side::Yes, 0.90);
        assert!(result.size_multiplier <= SIZE_MULTIPLIER_MAX);
        assert!(result.size_multiplier >= SIZE_MULTIPLIER_MIN);
    }

    #[test]
    fn no_rules_fire_on_neutral_market() {
        let scored = market(Category::Economy, 0.50, 0.01);
        let result = apply_personality_rules(&scored, Side::No, 0.55);
        assert_eq!(result.confidence, 0.55);
        assert_eq!(result.size_multiplier, 1.0);
        assert!(result.notes.is_empty());
    }
}
