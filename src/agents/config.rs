//! Configuration & feature flags (spec.md §4.16/§8, promoted to its own
//! component in SPEC_FULL.md §4.17). Loaded once at startup, donor pattern:
//! `Config::from_env()` in `models.rs`, `dotenv::dotenv().ok()` called first.

use std::collections::HashMap;
use std::time::Duration;

use super::types::{AgentId, AgentProfile, Category, RiskLevel, ScoreWeights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Live,
    Simulation,
}

/// Starting capital seeded for an agent's first-ever portfolio (spec.md §3
/// leaves the number unspecified; this engine uses the same figure the
/// sizing tests are written against).
pub const DEFAULT_STARTING_CAPITAL_USD: f64 = 3000.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EngineMode,
    pub debug: bool,
    pub interval_ms: u64,
    pub market_cache_ttl: Duration,
    pub news_cache_ttl: Duration,
    pub ai_cache_ttl: Duration,
    pub agent_trade_cache_ttl: Duration,
    pub flip_confidence_threshold: f64,
    pub cooldown_duration: Duration,
    pub adaptive_tuner_interval: Duration,
    pub port: u16,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mode = match std::env::var("PREDICTION_ENGINE_MODE")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "live" => EngineMode::Live,
            _ => EngineMode::Simulation,
        };

        let debug = std::env::var("PREDICTION_ENGINE_DEBUG")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let interval_ms = env_parse("PREDICTION_ENGINE_INTERVAL_MS", 60_000);

        let ai_cache_ttl_secs = env_parse("PREDICTION_ENGINE_AI_CACHE_TTL_SECS", 300).clamp(300, 600);

        let flip_confidence_threshold =
            env_parse_f64("PREDICTION_ENGINE_FLIP_CONFIDENCE_THRESHOLD", 0.60);

        let cooldown_hours = env_parse("PREDICTION_ENGINE_COOLDOWN_HOURS", 24);

        let port = env_parse("PORT", 8080u16);

        Self {
            mode,
            debug,
            interval_ms,
            market_cache_ttl: Duration::from_secs(60),
            news_cache_ttl: Duration::from_secs(5 * 60),
            ai_cache_ttl: Duration::from_secs(ai_cache_ttl_secs),
            agent_trade_cache_ttl: Duration::from_secs(30),
            flip_confidence_threshold,
            cooldown_duration: Duration::from_secs(cooldown_hours * 3600),
            adaptive_tuner_interval: Duration::from_secs(24 * 3600),
            port,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|x| x.is_finite())
        .unwrap_or(default)
}

/// The closed set of six agent profiles, before any runtime override is
/// applied. Values are illustrative defaults chosen to exercise every risk
/// tier and category-focus combination spec.md §3 describes.
pub fn default_agent_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile {
            agent_id: AgentId::Grok4,
            display_name: "Grok 4".to_string(),
            risk: RiskLevel::High,
            min_volume: 50_000.0,
            min_liquidity: 10_000.0,
            max_trades: 5,
            focus_categories: vec![Category::Crypto, Category::Tech],
            weights: ScoreWeights {
                volume: 1.3,
                liquidity: 1.0,
                price_movement: 1.4,
                news: 0.9,
                probability: 1.0,
            },
            enabled: true,
        },
        AgentProfile {
            agent_id: AgentId::Gpt5,
            display_name: "GPT-5".to_string(),
            risk: RiskLevel::Medium,
            min_volume: 75_000.0,
            min_liquidity: 15_000.0,
            max_trades: 6,
            focus_categories: vec![Category::Economy, Category::Politics],
            weights: ScoreWeights {
                volume: 1.0,
                liquidity: 1.2,
                price_movement: 1.0,
                news: 1.3,
                probability: 1.0,
            },
            enabled: true,
        },
        AgentProfile {
            agent_id: AgentId::DeepseekV3,
            display_name: "DeepSeek V3".to_string(),
            risk: RiskLevel::Medium,
            min_volume: 40_000.0,
            min_liquidity: 8_000.0,
            max_trades: 8,
            focus_categories: vec![],
            weights: ScoreWeights {
                volume: 1.1,
                liquidity: 1.1,
                price_movement: 1.1,
                news: 1.0,
                probability: 1.1,
            },
            enabled: true,
        },
        AgentProfile {
            agent_id: AgentId::Gemini25,
            display_name: "Gemini 2.5".to_string(),
            risk: RiskLevel::Low,
            min_volume: 100_000.0,
            min_liquidity: 25_000.0,
            max_trades: 4,
            focus_categories: vec![Category::Tech, Category::Entertainment],
            weights: ScoreWeights {
                volume: 1.2,
                liquidity: 1.3,
                price_movement: 0.8,
                news: 1.1,
                probability: 1.0,
            },
            enabled: true,
        },
        AgentProfile {
            agent_id: AgentId::Claude45,
            display_name: "Claude 4.5".to_string(),
            risk: RiskLevel::Low,
            min_volume: 60_000.0,
            min_liquidity: 15_000.0,
            max_trades: 5,
            focus_categories: vec![Category::Politics, Category::Economy],
            weights: ScoreWeights {
                volume: 1.0,
                liquidity: 1.2,
                price_movement: 0.9,
                news: 1.4,
                probability: 1.0,
            },
            enabled: true,
        },
        AgentProfile {
            agent_id: AgentId::Qwen25,
            display_name: "Qwen 2.5".to_string(),
            risk: RiskLevel::High,
            min_volume: 30_000.0,
            min_liquidity: 5_000.0,
            max_trades: 7,
            focus_categories: vec![Category::Sports],
            weights: ScoreWeights {
                volume: 1.2,
                liquidity: 0.9,
                price_movement: 1.3,
                news: 0.9,
                probability: 1.0,
            },
            enabled: true,
        },
    ]
}

/// Runtime override store (spec.md §3 "defaults merged with override store").
/// A process-wide in-memory map keyed by `AgentId`, read once at profile-load
/// time; callers may mutate it (e.g. from an admin endpoint, out of scope
/// here) between cycles.
#[derive(Debug, Default)]
pub struct ProfileOverrideStore {
    overrides: HashMap<AgentId, AgentProfileOverride>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentProfileOverride {
    pub enabled: Option<bool>,
    pub max_trades: Option<usize>,
    pub risk: Option<RiskLevel>,
}

impl ProfileOverrideStore {
    pub fn set(&mut self, agent_id: AgentId, over: AgentProfileOverride) {
        self.overrides.insert(agent_id, over);
    }

    pub fn apply(&self, mut profiles: Vec<AgentProfile>) -> Vec<AgentProfile> {
        for profile in &mut profiles {
            if let Some(over) = self.overrides.get(&profile.agent_id) {
                if let Some(enabled) = over.enabled {
                    profile.enabled = enabled;
                }
                if let Some(max_trades) = over.max_trades {
                    profile.max_trades = max_trades;
                }
                if let Some(risk) = over.risk {
                    profile.risk = risk;
                }
            }
        }
        profiles
    }
}
