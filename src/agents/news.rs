//! News aggregator (spec.md §4.3). Fans out to every configured provider
//! concurrently with a bounded per-provider timeout; a provider failure is
//! isolated (donor pattern: `futures_util`/`tokio::join!` fan-out seen in
//! `signals/enrichment.rs`'s concurrent source collection). Providers with no
//! API key configured are skipped silently — `ConfigurationAbsent`, not an
//! error (spec.md §7).

use std::time::Duration;
use tracing::warn;

use super::cache::SingleTtlCache;
use super::stats::{AdapterCacheStats, AdapterStats};
use super::types::NewsArticle;

const PER_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured news provider. `env_key` names the env var whose presence
/// enables it (spec.md §8: "presence enables that provider").
#[derive(Debug, Clone)]
pub struct NewsProviderConfig {
    pub name: &'static str,
    pub env_key: &'static str,
    pub base_url: String,
}

pub fn configured_providers() -> Vec<(NewsProviderConfig, String)> {
    const CANDIDATES: [(&str, &str, &str); 5] = [
        ("newsapi", "NEWS_PROVIDER_NEWSAPI_API_KEY", "https://newsapi.org/v2"),
        (
            "gnews",
            "NEWS_PROVIDER_GNEWS_API_KEY",
            "https://gnews.io/api/v4",
        ),
        (
            "mediastack",
            "NEWS_PROVIDER_MEDIASTACK_API_KEY",
            "http://api.mediastack.com/v1",
        ),
        (
            "cryptopanic",
            "NEWS_PROVIDER_CRYPTOPANIC_API_KEY",
            "https://cryptopanic.com/api/v1",
        ),
        (
            "currentsapi",
            "NEWS_PROVIDER_CURRENTSAPI_API_KEY",
            "https://api.currentsapi.services/v1",
        ),
    ];

    CANDIDATES
        .into_iter()
        .filter_map(|(name, env_key, base_url)| {
            let api_key = std::env::var(env_key).ok().filter(|v| !v.trim().is_empty())?;
            Some((
                NewsProviderConfig {
                    name,
                    env_key,
                    base_url: base_url.to_string(),
                },
                api_key,
            ))
        })
        .collect()
}

/// Provider-local response shape. Each real provider has its own field names;
/// this adapter-local struct plus a mapping function conforms every provider
/// to the unified `NewsArticle` (spec.md §4.3: "Per-provider mapping fields
/// are adapter-local").
#[derive(Debug, Clone, serde::Deserialize)]
struct ProviderArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "publishedAt", alias = "published_at")]
    published_at: Option<String>,
    #[serde(default)]
    source: Option<ProviderSource>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
enum ProviderSource {
    Named { name: String },
    Plain(String),
}

impl ProviderSource {
    fn name(&self) -> String {
        match self {
            ProviderSource::Named { name } => name.clone(),
            ProviderSource::Plain(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ProviderResponse {
    #[serde(default, alias = "articles", alias = "results", alias = "data")]
    articles: Vec<ProviderArticle>,
}

fn parse_published_at(raw: Option<&str>) -> i64 {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(super::types::now_ms)
}

async fn fetch_provider(
    http: &reqwest::Client,
    provider: &NewsProviderConfig,
    api_key: &str,
) -> anyhow::Result<Vec<NewsArticle>> {
    let resp = http
        .get(format!("{}/top-headlines", provider.base_url))
        .timeout(PER_PROVIDER_TIMEOUT)
        .query(&[("apikey", api_key), ("language", "en")])
        .send()
        .await?
        .error_for_status()?;

    let body = resp.text().await?;
    let parsed: ProviderResponse = serde_json::from_str(&body)?;

    let articles = parsed
        .articles
        .into_iter()
        .filter_map(|a| {
            let title = a.title?;
            let url = a.url.unwrap_or_default();
            let source = a.source.map(|s| s.name()).unwrap_or_else(|| provider.name.to_string());
            Some(NewsArticle {
                article_id: format!("{}:{}", provider.name, url),
                title,
                description: a.description,
                content: a.content,
                source,
                published_at: parse_published_at(a.published_at.as_deref()),
                url,
                source_api: provider.name.to_string(),
            })
        })
        .collect();

    Ok(articles)
}

/// Deduplicates by lowercase-trimmed title; first occurrence wins (spec.md
/// §4.3).
pub fn dedup_by_title(articles: Vec<NewsArticle>) -> Vec<NewsArticle> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(articles.len());
    for article in articles {
        let key = article.title.trim().to_ascii_lowercase();
        if seen.insert(key) {
            out.push(article);
        }
    }
    out
}

pub struct NewsAggregator {
    http: reqwest::Client,
    cache: SingleTtlCache<Vec<NewsArticle>>,
    pub stats: AdapterStats,
}

impl NewsAggregator {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: SingleTtlCache::new(Duration::from_secs(5 * 60)),
            stats: AdapterStats::default(),
        }
    }

    pub async fn fetch_latest_news(&self) -> Vec<NewsArticle> {
        if let Some(fresh) = self.cache.get_fresh() {
            self.stats.record_hit();
            return fresh;
        }
        self.stats.record_miss();

        let providers = configured_providers();
        if providers.is_empty() {
            warn!("no news providers configured; serving cached/empty");
            return self.cache.get_stale().unwrap_or_default();
        }

        let futures = providers.iter().map(|(provider, api_key)| {
            let http = self.http.clone();
            async move {
                match fetch_provider(&http, provider, api_key).await {
                    Ok(articles) => Some(articles),
                    Err(err) => {
                        warn!(provider = provider.name, error = %err, "news provider failed, isolated");
                        None
                    }
                }
            }
        });

        let results: Vec<Option<Vec<NewsArticle>>> = futures_util::future::join_all(futures).await;
        let all_failed = results.iter().all(|r| r.is_none());
        let combined: Vec<NewsArticle> = results.into_iter().flatten().flatten().collect();

        if all_failed {
            self.stats.record_error("all news providers failed");
            return self.cache.get_stale().unwrap_or_default();
        }

        let deduped = dedup_by_title(combined);
        self.stats.record_refresh();
        self.cache.set(deduped.clone());
        deduped
    }

    pub fn cache_stats(&self) -> AdapterCacheStats {
        self.stats.snapshot()
    }
}
