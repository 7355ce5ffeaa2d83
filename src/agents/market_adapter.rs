//! Market source adapter (spec.md §4.2). Grounded on the Gamma-API lookup
//! pattern in `scrapers/polymarket_gamma.rs`: typed response structs with
//! lenient deserializers for upstream fields that are sometimes strings and
//! sometimes numbers, a stored `cached_at` timestamp for the freshness
//! window, and `reqwest` with an explicit timeout.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache::SingleTtlCache;
use super::stats::{AdapterCacheStats, AdapterStats};
use super::types::{Category, Market, MarketStatus};

const DEFAULT_PAGE_SIZE: u32 = 1000;
const MAX_PAGES: u32 = 5;

/// Raw upstream record. Fields the spec requires for a valid market are
/// non-`Option` here only insofar as we *read* them leniently; validation
/// happens in `normalize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMarketRecord {
    #[serde(default, alias = "id", alias = "marketId")]
    pub market_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "de_string_f64_opt", alias = "volume")]
    pub volume_usd: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt", alias = "liquidity")]
    pub liquidity_usd: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de_string_f64_opt",
        alias = "probability"
    )]
    pub current_probability: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de_string_f64_opt",
        alias = "price_change_24h"
    )]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    pub resolved_outcome: Option<f64>,
}

fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn parse_status(raw: Option<&str>) -> MarketStatus {
    match raw.unwrap_or("").to_ascii_lowercase().as_str() {
        "resolved" | "closed" => MarketStatus::Resolved,
        "frozen" | "paused" => MarketStatus::Frozen,
        "invalid" => MarketStatus::Invalid,
        _ => MarketStatus::Active,
    }
}

/// Normalizes a raw record, dropping it (and counting the drop, not raising)
/// if any of `{marketId, question, volumeUsd, currentProbability}` is missing
/// or non-numeric (spec.md §4.2).
pub fn normalize_market(raw: RawMarketRecord) -> Option<Market> {
    let market_id = raw.market_id?;
    let question = raw.question?;
    let volume_usd = raw.volume_usd.filter(|v| v.is_finite())?;
    let current_probability = raw.current_probability.filter(|v| v.is_finite())?;

    Some(Market {
        market_id,
        question,
        category: Category::from_raw(raw.category.as_deref().unwrap_or("")),
        volume_usd: volume_usd.max(0.0),
        liquidity_usd: raw.liquidity_usd.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0),
        current_probability: current_probability.clamp(0.0, 1.0),
        price_change_24h: raw
            .price_change_24h
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
            .clamp(-1.0, 1.0),
        status: parse_status(raw.status.as_deref()),
        resolved_outcome: raw.resolved_outcome.filter(|v| v.is_finite()),
    })
}

#[derive(Debug, Clone)]
pub struct MarketApiCredentials {
    pub base_url: String,
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl MarketApiCredentials {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PREDICTION_MARKET_API_BASE_URL").ok()?;
        let key = std::env::var("PREDICTION_MARKET_API_KEY").ok()?;
        let secret = std::env::var("PREDICTION_MARKET_API_SECRET").unwrap_or_default();
        let passphrase = std::env::var("PREDICTION_MARKET_API_PASSPHRASE").unwrap_or_default();
        Some(Self {
            base_url,
            key,
            secret,
            passphrase,
        })
    }
}

pub struct MarketAdapter {
    http: reqwest::Client,
    credentials: Option<MarketApiCredentials>,
    cache: SingleTtlCache<Vec<Market>>,
    pub stats: AdapterStats,
}

impl MarketAdapter {
    pub fn new(http: reqwest::Client, credentials: Option<MarketApiCredentials>) -> Self {
        Self {
            http,
            credentials,
            cache: SingleTtlCache::new(Duration::from_secs(60)),
            stats: AdapterStats::default(),
        }
    }

    /// Respects the 60s freshness window; on refresh paginates up to
    /// `MAX_PAGES` pages of `DEFAULT_PAGE_SIZE` each. On upstream failure
    /// returns the last successful (possibly stale) cache, or an empty list
    /// if there is none. Never raises to the caller.
    pub async fn fetch_all_markets(&self) -> Vec<Market> {
        if let Some(fresh) = self.cache.get_fresh() {
            self.stats.record_hit();
            return fresh;
        }
        self.stats.record_miss();

        let Some(creds) = &self.credentials else {
            warn!("market adapter has no credentials configured; returning cached/empty");
            return self.cache.get_stale().unwrap_or_default();
        };

        match self.fetch_fresh(creds).await {
            Ok(markets) => {
                self.stats.record_refresh();
                self.cache.set(markets.clone());
                markets
            }
            Err(err) => {
                warn!(error = %err, "market adapter refresh failed, serving stale cache");
                self.stats.record_error(&err);
                self.cache.get_stale().unwrap_or_default()
            }
        }
    }

    async fn fetch_fresh(&self, creds: &MarketApiCredentials) -> anyhow::Result<Vec<Market>> {
        let mut all = Vec::new();
        let mut rejected = 0u64;

        for page in 0..MAX_PAGES {
            let resp = self
                .http
                .get(format!("{}/markets", creds.base_url.trim_end_matches('/')))
                .timeout(Duration::from_secs(10))
                .header("X-API-KEY", &creds.key)
                .query(&[
                    ("limit", DEFAULT_PAGE_SIZE.to_string()),
                    ("offset", (page * DEFAULT_PAGE_SIZE).to_string()),
                ])
                .send()
                .await?
                .error_for_status()?;

            let body = resp.text().await?;
            let raw: Vec<RawMarketRecord> = serde_json::from_str(&body).map_err(|e| {
                warn!(error = %e, preview = %body.chars().take(300).collect::<String>(), "market page json parse failed");
                e
            })?;

            if raw.is_empty() {
                break;
            }

            let page_len = raw.len();
            for record in raw {
                match normalize_market(record) {
                    Some(m) => all.push(m),
                    None => rejected += 1,
                }
            }

            debug!(page, page_len, rejected, "market page fetched");
            if page_len < DEFAULT_PAGE_SIZE as usize {
                break;
            }
        }

        self.stats.record_rejected(rejected);
        Ok(all)
    }

    pub fn cache_stats(&self) -> AdapterCacheStats {
        self.stats.snapshot()
    }
}
