//! Web-search adapter (spec.md §4.4). Selects SerpAPI if `SERPAPI_KEY` is
//! set, else Google CSE if both `GOOGLE_CSE_KEY` and `GOOGLE_CSE_ENGINE_ID`
//! are set, else falls back to an always-empty `NullWebSearch` — the capability
//! interface with concrete implementations selected by constant lookup,
//! applied to a binary choice (SPEC_FULL.md §4.4 supplement).

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

const MAX_RESULTS: usize = 5;
const SNIPPET_MAX_CHARS: usize = 150;
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, serde::Serialize)]
pub struct WebSearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    pub source: String,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Vec<WebSearchResult>;
}

pub struct NullWebSearch;

#[async_trait]
impl WebSearchProvider for NullWebSearch {
    async fn search(&self, _query: &str) -> Vec<WebSearchResult> {
        Vec::new()
    }
}

pub struct SerpApiSearch {
    http: reqwest::Client,
    api_key: String,
}

#[async_trait]
impl WebSearchProvider for SerpApiSearch {
    async fn search(&self, query: &str) -> Vec<WebSearchResult> {
        let result = self
            .http
            .get("https://serpapi.com/search")
            .timeout(TIMEOUT)
            .query(&[("q", query), ("api_key", &self.api_key), ("engine", "google")])
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "serpapi request failed");
                return Vec::new();
            }
        };

        let body = match resp.text().await {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };

        parse_serpapi_response(&body)
    }
}

fn parse_serpapi_response(body: &str) -> Vec<WebSearchResult> {
    #[derive(serde::Deserialize)]
    struct Organic {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        snippet: Option<String>,
        #[serde(default)]
        link: Option<String>,
        #[serde(default)]
        source: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        #[serde(default, rename = "organic_results")]
        organic_results: Vec<Organic>,
    }

    let parsed: Resp = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "serpapi response parse failed");
            return Vec::new();
        }
    };

    parsed
        .organic_results
        .into_iter()
        .take(MAX_RESULTS)
        .filter_map(|o| {
            let title = o.title?;
            let url = o.link?;
            Some(WebSearchResult {
                snippet: truncate_snippet(o.snippet.unwrap_or_default().as_str()),
                title,
                source: o.source.unwrap_or_else(|| "serpapi".to_string()),
                url,
            })
        })
        .collect()
}

pub struct GoogleCseSearch {
    http: reqwest::Client,
    api_key: String,
    engine_id: String,
}

#[async_trait]
impl WebSearchProvider for GoogleCseSearch {
    async fn search(&self, query: &str) -> Vec<WebSearchResult> {
        let result = self
            .http
            .get("https://www.googleapis.com/customsearch/v1")
            .timeout(TIMEOUT)
            .query(&[("q", query.to_string()), ("key", self.api_key.clone()), ("cx", self.engine_id.clone())])
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "google cse request failed");
                return Vec::new();
            }
        };

        let body = match resp.text().await {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };

        parse_cse_response(&body)
    }
}

fn parse_cse_response(body: &str) -> Vec<WebSearchResult> {
    #[derive(serde::Deserialize)]
    struct Item {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        snippet: Option<String>,
        #[serde(default)]
        link: Option<String>,
        #[serde(default, rename = "displayLink")]
        display_link: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct Resp {
        #[serde(default)]
        items: Vec<Item>,
    }

    let parsed: Resp = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };

    parsed
        .items
        .into_iter()
        .take(MAX_RESULTS)
        .filter_map(|i| {
            let title = i.title?;
            let url = i.link?;
            Some(WebSearchResult {
                snippet: truncate_snippet(i.snippet.unwrap_or_default().as_str()),
                title,
                source: i.display_link.unwrap_or_else(|| "google".to_string()),
                url,
            })
        })
        .collect()
}

fn truncate_snippet(s: &str) -> String {
    s.chars().take(SNIPPET_MAX_CHARS).collect()
}

/// Builds the configured provider, selected once at startup per the
/// credential-presence rule above.
pub fn build_web_search(http: reqwest::Client) -> Box<dyn WebSearchProvider> {
    if let Ok(serpapi_key) = std::env::var("SERPAPI_KEY") {
        if !serpapi_key.trim().is_empty() {
            return Box::new(SerpApiSearch {
                http,
                api_key: serpapi_key,
            });
        }
    }

    if let (Ok(key), Ok(engine_id)) = (
        std::env::var("GOOGLE_CSE_KEY"),
        std::env::var("GOOGLE_CSE_ENGINE_ID"),
    ) {
        if !key.trim().is_empty() && !engine_id.trim().is_empty() {
            return Box::new(GoogleCseSearch {
                http,
                api_key: key,
                engine_id,
            });
        }
    }

    Box::new(NullWebSearch)
}
