//! Scoring engine (spec.md §4.5): pure functions producing a 5-component
//! score per `(agent, market)`. Kept side-effect-free and unit-testable in
//! isolation, matching the "rolling stats / pure function" shape of
//! `signals/quality.rs` in the donor codebase.

use super::types::{
    AgentProfile, Category, CategoryBias, Market, NewsArticle, ScoreComponents, ScoredMarket,
    SourceTier, TimestampMs,
};

pub const MIN_KEYWORD_LEN: usize = 4;

pub const STOPWORDS: &[&str] = &[
    "will", "this", "that", "with", "from", "have", "does", "what", "when", "where", "which",
    "their", "there", "about", "could", "would", "should", "after", "before", "happen", "market",
    "into", "over", "than", "been", "more", "most", "some", "such", "these", "those",
];

/// Extracts candidate keywords from a market question: tokens of length >= 4,
/// lowercased, minus the stopword list.
pub fn extract_keywords(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_KEYWORD_LEN)
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect()
}

fn age_hours(published_at: TimestampMs, now: TimestampMs) -> f64 {
    ((now - published_at).max(0) as f64) / (1000.0 * 3600.0)
}

/// Recency weight by article age (spec.md §4.5).
pub fn recency_weight(published_at: TimestampMs, now: TimestampMs) -> f64 {
    let age = age_hours(published_at, now);
    if age < 1.0 {
        1.0
    } else if age < 6.0 {
        0.7
    } else if age < 24.0 {
        0.4
    } else if age < 72.0 {
        0.25
    } else {
        0.1
    }
}

/// Fixed source-tier allowlist. Unlisted sources default to LONG_TAIL.
pub fn source_tier(source: &str) -> SourceTier {
    const TOP_TIER: &[&str] = &["reuters", "associated press", "ap", "bloomberg", "wall street journal"];
    const MAJOR: &[&str] = &[
        "cnbc",
        "the verge",
        "techcrunch",
        "coindesk",
        "the block",
        "cnn",
        "bbc",
        "financial times",
    ];

    let lowered = source.trim().to_ascii_lowercase();
    if TOP_TIER.contains(&lowered.as_str()) {
        SourceTier::TopTier
    } else if MAJOR.contains(&lowered.as_str()) {
        SourceTier::Major
    } else {
        SourceTier::LongTail
    }
}

pub fn source_weight(tier: SourceTier) -> f64 {
    match tier {
        SourceTier::TopTier => 1.0,
        SourceTier::Major => 0.8,
        SourceTier::LongTail => 0.5,
    }
}

fn article_matches_keyword(article: &NewsArticle, keyword: &str) -> bool {
    let haystacks = [
        article.title.as_str(),
        article.description.as_deref().unwrap_or(""),
        article.content.as_deref().unwrap_or(""),
    ];
    haystacks
        .iter()
        .any(|h| h.to_ascii_lowercase().contains(keyword))
}

/// News intensity contribution summed over every keyword/article match
/// (spec.md §4.5).
pub fn news_intensity(question: &str, news: &[NewsArticle], now: TimestampMs) -> f64 {
    let keywords = extract_keywords(question);
    if keywords.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    for article in news {
        for keyword in &keywords {
            if article_matches_keyword(article, keyword) {
                let tier = source_tier(&article.source);
                total += recency_weight(article.published_at, now) * source_weight(tier);
            }
        }
    }
    total
}

pub fn volume_score(volume_usd: f64) -> f64 {
    (volume_usd / 100_000.0).min(1.0) * 30.0
}

pub fn liquidity_score(liquidity_usd: f64) -> f64 {
    (liquidity_usd / 50_000.0).min(1.0) * 20.0
}

pub fn price_movement_score(price_change_24h: f64) -> f64 {
    (price_change_24h.abs() * 10.0).min(1.0) * 15.0
}

pub fn news_score(intensity: f64) -> f64 {
    (intensity / 6.0).min(1.0) * 25.0
}

pub fn prob_score(current_probability: f64) -> f64 {
    (1.0 - 2.0 * (current_probability - 0.5).abs()) * 10.0
}

/// Scores a single market for one agent. `category_bias` is applied only
/// when an `AdaptiveConfig` exists for the agent (spec.md §4.5).
pub fn score_market(
    market: &Market,
    news: &[NewsArticle],
    agent: &AgentProfile,
    category_bias: Option<&CategoryBias>,
    now: TimestampMs,
) -> ScoredMarket {
    let intensity = news_intensity(&market.question, news, now);

    let components = ScoreComponents {
        volume_score: volume_score(market.volume_usd),
        liquidity_score: liquidity_score(market.liquidity_usd),
        price_movement_score: price_movement_score(market.price_change_24h),
        news_score: news_score(intensity),
        prob_score: prob_score(market.current_probability),
    };

    let w = &agent.weights;
    let weight_sum = w.sum();
    let raw = components.volume_score * w.volume
        + components.liquidity_score * w.liquidity
        + components.price_movement_score * w.price_movement
        + components.news_score * w.news
        + components.prob_score * w.probability;

    let mut final_score = if weight_sum > 0.0 { raw / weight_sum } else { 0.0 };

    if let Some(bias) = category_bias {
        final_score *= bias.get(market.category);
    }

    ScoredMarket {
        market: market.clone(),
        score: final_score.max(0.0),
        components,
    }
}

/// Filters candidates per spec.md §4.5: volume/liquidity/status gate, then
/// prefer focus categories, falling back to all categories only if fewer than
/// `2 * maxTrades` pass the filter.
pub fn filter_candidates<'a>(markets: &'a [Market], agent: &AgentProfile) -> Vec<&'a Market> {
    let base: Vec<&Market> = markets
        .iter()
        .filter(|m| {
            m.volume_usd >= agent.min_volume
                && m.liquidity_usd >= agent.min_liquidity
                && m.status == super::types::MarketStatus::Active
        })
        .collect();

    if agent.focus_categories.is_empty() {
        return base;
    }

    let focused: Vec<&Market> = base
        .iter()
        .copied()
        .filter(|m| agent.focus_categories.contains(&m.category))
        .collect();

    if focused.len() >= 2 * agent.max_trades {
        focused
    } else {
        base
    }
}

pub fn top_keyword_matches<'a>(
    question: &str,
    news: &'a [NewsArticle],
    limit: usize,
) -> Vec<&'a NewsArticle> {
    let keywords = extract_keywords(question);
    let mut matches: Vec<&NewsArticle> = news
        .iter()
        .filter(|a| keywords.iter().any(|k| article_matches_keyword(a, k)))
        .collect();
    matches.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    matches.truncate(limit);
    matches
}
