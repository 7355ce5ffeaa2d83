//! Core data model (spec.md §3): the entities every other module in
//! `crate::agents` reads or writes. Everything here derives `Serialize` /
//! `Deserialize` because both the read API and the persistence adapter need
//! to move these across a boundary, matching the convention in `models.rs`
//! and `vault/*.rs`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Kept as a plain integer (rather than
/// `chrono::DateTime`) so that every timestamp comparison in the hot cycle
/// path is cheap integer arithmetic; conversion to `DateTime<Utc>` happens
/// only at the API boundary.
pub type TimestampMs = i64;

pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Crypto,
    Politics,
    Sports,
    Tech,
    Economy,
    Entertainment,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Crypto,
        Category::Politics,
        Category::Sports,
        Category::Tech,
        Category::Economy,
        Category::Entertainment,
        Category::Other,
    ];

    /// Normalizes a raw upstream category string via a fixed lowercase-keyed
    /// mapping; anything unrecognized falls to `Other` (spec.md §4.2).
    pub fn from_raw(raw: &str) -> Category {
        match raw.trim().to_ascii_lowercase().as_str() {
            "crypto" | "cryptocurrency" | "bitcoin" | "defi" => Category::Crypto,
            "politics" | "election" | "elections" | "government" => Category::Politics,
            "sports" | "sport" | "nfl" | "nba" | "soccer" | "football" => Category::Sports,
            "tech" | "technology" | "ai" | "science" => Category::Tech,
            "economy" | "economics" | "finance" | "business" | "markets" => Category::Economy,
            "entertainment" | "pop culture" | "movies" | "music" | "celebrity" => {
                Category::Entertainment
            }
            _ => Category::Other,
        }
    }
}

/// Closed roster of six agent identities (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentId {
    Grok4,
    Gpt5,
    DeepseekV3,
    Gemini25,
    Claude45,
    Qwen25,
}

impl AgentId {
    pub const ALL: [AgentId; 6] = [
        AgentId::Grok4,
        AgentId::Gpt5,
        AgentId::DeepseekV3,
        AgentId::Gemini25,
        AgentId::Claude45,
        AgentId::Qwen25,
    ];

    /// Stable internal identifier, also used as the persistence key.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Grok4 => "GROK_4",
            AgentId::Gpt5 => "GPT_5",
            AgentId::DeepseekV3 => "DEEPSEEK_V3",
            AgentId::Gemini25 => "GEMINI_2_5",
            AgentId::Claude45 => "CLAUDE_4_5",
            AgentId::Qwen25 => "QWEN_2_5",
        }
    }

    /// Frontend-facing id, per the bidirectional map in spec.md §6.
    pub fn frontend_id(&self) -> &'static str {
        match self {
            AgentId::Grok4 => "grok",
            AgentId::Gpt5 => "gpt5",
            AgentId::DeepseekV3 => "deepseek",
            AgentId::Gemini25 => "gemini",
            AgentId::Claude45 => "claude",
            AgentId::Qwen25 => "qwen",
        }
    }

    pub fn from_frontend_id(id: &str) -> Option<AgentId> {
        AgentId::ALL
            .into_iter()
            .find(|a| a.frontend_id().eq_ignore_ascii_case(id))
    }

    pub fn from_internal_id(id: &str) -> Option<AgentId> {
        AgentId::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// `+1` for YES, `-1` for NO (spec.md §4.10 PnL direction).
    pub fn direction(&self) -> f64 {
        match self {
            Side::Yes => 1.0,
            Side::No => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn parse_case_insensitive(raw: &str) -> Option<Side> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Side::Yes),
            "NO" => Some(Side::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Active,
    Resolved,
    Frozen,
    Invalid,
}

/// Weights for the five score components; every field is expected to be > 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub volume: f64,
    pub liquidity: f64,
    pub price_movement: f64,
    pub news: f64,
    pub probability: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.volume + self.liquidity + self.price_movement + self.news + self.probability
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: AgentId,
    pub display_name: String,
    pub risk: RiskLevel,
    pub min_volume: f64,
    pub min_liquidity: f64,
    pub max_trades: usize,
    pub focus_categories: Vec<Category>,
    pub weights: ScoreWeights,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub question: String,
    pub category: Category,
    pub volume_usd: f64,
    pub liquidity_usd: f64,
    pub current_probability: f64,
    pub price_change_24h: f64,
    pub status: MarketStatus,
    pub resolved_outcome: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    TopTier,
    Major,
    LongTail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub article_id: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub source: String,
    pub published_at: TimestampMs,
    pub url: String,
    pub source_api: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub volume_score: f64,
    pub liquidity_score: f64,
    pub price_movement_score: f64,
    pub news_score: f64,
    pub prob_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMarket {
    pub market: Market,
    pub score: f64,
    pub components: ScoreComponents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AITradeDecision {
    pub side: Side,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    ScoreDecay,
    MarketInvalid,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub agent_id: AgentId,
    pub market_id: String,
    pub side: Side,
    pub size_usd: f64,
    pub entry_probability: f64,
    pub entry_score: f64,
    pub confidence: f64,
    pub status: TradeStatus,
    pub pnl_usd: Option<f64>,
    pub opened_at: TimestampMs,
    pub closed_at: Option<TimestampMs>,
    pub exit_reason: Option<ExitReason>,
    pub reasoning: Vec<String>,
    pub seed: String,
    pub category: Category,
}

impl Trade {
    /// Idempotency key used while the trade is open: `agentId:marketId`.
    pub fn open_key(agent_id: AgentId, market_id: &str) -> String {
        format!("{}:{}", agent_id.as_str(), market_id)
    }

    /// Permanent archival key assigned when a trade closes (spec.md §3:
    /// `hash(agentId, marketId, openedAt)`). Re-keying away from `open_key`
    /// on close frees the `agentId:marketId` slot for the market's next
    /// lifetime instead of colliding with it.
    pub fn closed_key(agent_id: AgentId, market_id: &str, opened_at: TimestampMs) -> String {
        let seed = super::primitives::seed(agent_id.as_str(), market_id, opened_at.max(0) as u64);
        format!("{}:{:08x}", agent_id.as_str(), super::primitives::hash32(&seed))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub side: Side,
    pub size_usd: f64,
    pub entry_probability: f64,
    pub entry_score: f64,
    pub opened_at: TimestampMs,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPortfolio {
    pub agent_id: AgentId,
    pub starting_capital_usd: f64,
    pub realized_pnl_usd: f64,
    pub unrealized_pnl_usd: f64,
    pub max_equity_usd: f64,
    pub open_positions: HashMap<String, Position>,
    pub cooldown_until: Option<TimestampMs>,
    pub last_updated: TimestampMs,
}

impl AgentPortfolio {
    pub fn new(agent_id: AgentId, starting_capital_usd: f64) -> Self {
        Self {
            agent_id,
            starting_capital_usd,
            realized_pnl_usd: 0.0,
            unrealized_pnl_usd: 0.0,
            max_equity_usd: starting_capital_usd,
            open_positions: HashMap::new(),
            cooldown_until: None,
            last_updated: now_ms(),
        }
    }

    pub fn current_capital_usd(&self) -> f64 {
        self.starting_capital_usd + self.realized_pnl_usd
    }

    pub fn equity_usd(&self) -> f64 {
        self.current_capital_usd() + self.unrealized_pnl_usd
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        if self.max_equity_usd <= 0.0 {
            return 0.0;
        }
        ((self.max_equity_usd - self.equity_usd()) / self.max_equity_usd).max(0.0)
    }

    pub fn total_open_exposure_usd(&self) -> f64 {
        self.open_positions.values().map(|p| p.size_usd).sum()
    }

    pub fn category_exposure_usd(&self, category: Category) -> f64 {
        self.open_positions
            .values()
            .filter(|p| p.category == category)
            .map(|p| p.size_usd)
            .sum()
    }

    pub fn bump_max_equity(&mut self) {
        let equity = self.equity_usd();
        if equity > self.max_equity_usd {
            self.max_equity_usd = equity;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub agent_id: AgentId,
    pub risk_multiplier: f64,
    pub computed_at: TimestampMs,
}

/// Category bias is stored alongside `AdaptiveConfig` but kept as a separate
/// map so `AdaptiveConfig` stays `Copy` for cheap reads in the scoring hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBias(pub HashMap<Category, f64>);

impl Default for CategoryBias {
    fn default() -> Self {
        CategoryBias(Category::ALL.into_iter().map(|c| (c, 1.0)).collect())
    }
}

impl CategoryBias {
    pub fn get(&self, category: Category) -> f64 {
        *self.0.get(&category).unwrap_or(&1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub market_id: String,
    pub yes_count: usize,
    pub no_count: usize,
    pub agreement: f64,
    pub side: Side,
    pub avg_confidence: f64,
    pub conflict: bool,
}
