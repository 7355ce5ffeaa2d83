//! Deterministic fallback decision path (spec.md §4.7), used whenever the
//! LLM is absent or unavailable. Every value is derived from `draw01`/`clamp`
//! so outputs are byte-identical across runs for a fixed seed.

use super::primitives::{clamp, draw01};
use super::types::{AgentProfile, RiskLevel, ScoredMarket, Side};

#[derive(Debug, Clone)]
pub struct FallbackDecision {
    pub side: Side,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

/// Per-component reasoning thresholds (share of component max) used to
/// surface which factors drove a fallback decision.
const COMPONENT_THRESHOLD_FRACTION: f64 = 0.6;

pub fn decide_fallback(scored: &ScoredMarket, agent: &AgentProfile, seed: &str) -> FallbackDecision {
    let prob_threshold = if scored.market.current_probability > 0.5 {
        0.6
    } else {
        0.4
    };
    let side = if draw01(seed) < prob_threshold {
        Side::Yes
    } else {
        Side::No
    };

    let raw_confidence = scored.score / 100.0;
    let risk_adjusted = match agent.risk {
        RiskLevel::High => (raw_confidence * 1.10).min(0.95),
        RiskLevel::Low => (raw_confidence * 0.90).max(0.40),
        RiskLevel::Medium => raw_confidence,
    };

    let jitter_seed = format!("{seed}:jitter");
    let jitter = (draw01(&jitter_seed) - 0.5) * 0.10;
    let confidence = clamp(risk_adjusted + jitter, 0.40, 0.95);

    FallbackDecision {
        side,
        confidence,
        reasoning: fallback_reasoning(scored),
    }
}

fn fallback_reasoning(scored: &ScoredMarket) -> Vec<String> {
    let c = &scored.components;
    let mut lines = Vec::new();

    if c.volume_score >= 30.0 * COMPONENT_THRESHOLD_FRACTION {
        lines.push("strong trading volume".to_string());
    }
    if c.liquidity_score >= 20.0 * COMPONENT_THRESHOLD_FRACTION {
        lines.push("deep liquidity".to_string());
    }
    if c.price_movement_score >= 15.0 * COMPONENT_THRESHOLD_FRACTION {
        lines.push("significant 24h price movement".to_string());
    }
    if c.news_score >= 25.0 * COMPONENT_THRESHOLD_FRACTION {
        lines.push("heavy recent news coverage".to_string());
    }
    if c.prob_score >= 10.0 * COMPONENT_THRESHOLD_FRACTION {
        lines.push("probability close to a coin flip".to_string());
    }

    if lines.is_empty() {
        lines.push("deterministic fallback: no single component dominated the score".to_string());
    }

    lines
}
