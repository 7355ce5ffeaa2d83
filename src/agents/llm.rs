//! LLM decision layer (spec.md §4.6). Grounded directly on the donor's
//! `vault/llm.rs` `OpenRouterClient`: one HTTP client per provider, a
//! `LlmCallOutput { model, content, usage, latency_ms }` shape reused
//! verbatim, hard per-call timeout, no retries. Per-agent dispatch is a
//! capability trait (`LlmProvider`) with six concrete implementations,
//! selected through a `match` on `AgentId` — the "duck-typed agent has this
//! method" redesign flag in spec.md §9, resolved as a capability trait plus a
//! lookup table.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

use super::cache::KeyedTtlCache;
use super::types::{AITradeDecision, AgentId, NewsArticle, ScoredMarket, Side};
use super::websearch::WebSearchResult;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REASONING_LINES: usize = 3;

#[derive(Debug, Clone)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

/// Outcome of a `decide` call: either a validated decision, or an explicit
/// "unavailable" signal the trade engine pattern-matches to fall back to the
/// deterministic path (spec.md §4.6/§4.7).
#[derive(Debug, Clone)]
pub enum LlmOutcome {
    Decision(AITradeDecision),
    Unavailable(String),
}

/// Capability interface implemented once per LLM provider/endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn call(&self, system: &str, user: &str) -> Result<LlmCallOutput>;
}

struct ChatCompletionProvider {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    auth_header: AuthHeader,
}

enum AuthHeader {
    Bearer(String),
    AnthropicVersion(String),
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[async_trait]
impl LlmProvider for ChatCompletionProvider {
    async fn call(&self, system: &str, user: &str) -> Result<LlmCallOutput> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(0.3),
            max_tokens: Some(512),
        };

        let mut http_req = self
            .http
            .post(&self.endpoint)
            .timeout(CALL_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        http_req = match &self.auth_header {
            AuthHeader::Bearer(key) => http_req.header(reqwest::header::AUTHORIZATION, format!("Bearer {key}")),
            AuthHeader::AnthropicVersion(key) => http_req
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01"),
        };

        let resp = http_req.json(&req).send().await.context("llm request")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(500).collect();
            return Err(anyhow!("llm endpoint {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("llm response json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(LlmCallOutput {
            model: self.model.clone(),
            content,
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// One env-key/endpoint/model triple per agent identity.
fn provider_spec(agent_id: AgentId) -> (&'static str, &'static str, &'static str) {
    match agent_id {
        AgentId::Grok4 => ("XAI_API_KEY", "https://api.x.ai/v1/chat/completions", "grok-4"),
        AgentId::Gpt5 => (
            "OPENAI_API_KEY",
            "https://api.openai.com/v1/chat/completions",
            "gpt-5",
        ),
        AgentId::DeepseekV3 => (
            "DEEPSEEK_API_KEY",
            "https://api.deepseek.com/v1/chat/completions",
            "deepseek-chat",
        ),
        AgentId::Gemini25 => (
            "GEMINI_API_KEY",
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            "gemini-2.5-pro",
        ),
        AgentId::Claude45 => (
            "ANTHROPIC_API_KEY",
            "https://api.anthropic.com/v1/messages",
            "claude-4.5",
        ),
        AgentId::Qwen25 => (
            "DASHSCOPE_API_KEY",
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            "qwen2.5",
        ),
    }
}

fn build_provider(http: reqwest::Client, agent_id: AgentId, api_key: String) -> Box<dyn LlmProvider> {
    let (_, endpoint, model) = provider_spec(agent_id);
    let auth_header = match agent_id {
        AgentId::Claude45 => AuthHeader::AnthropicVersion(api_key),
        _ => AuthHeader::Bearer(api_key),
    };
    Box::new(ChatCompletionProvider {
        http,
        endpoint: endpoint.to_string(),
        model: model.to_string(),
        auth_header,
    })
}

struct AgentLlmClient {
    provider: Option<Box<dyn LlmProvider>>,
}

pub struct LlmDecisionLayer {
    clients: std::collections::HashMap<AgentId, AgentLlmClient>,
    cache: KeyedTtlCache<String, AITradeDecision>,
    config_absent_logged: parking_lot::Mutex<std::collections::HashSet<AgentId>>,
}

impl LlmDecisionLayer {
    pub fn from_env(http: reqwest::Client, ttl: Duration) -> Self {
        let mut clients = std::collections::HashMap::new();
        for agent_id in AgentId::ALL {
            let (env_key, _, _) = provider_spec(agent_id);
            let provider = std::env::var(env_key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|key| build_provider(http.clone(), agent_id, key));
            clients.insert(agent_id, AgentLlmClient { provider });
        }

        Self {
            clients,
            cache: KeyedTtlCache::new(ttl),
            config_absent_logged: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// `decide` contract (spec.md §4.6): cache hit short-circuits without any
    /// network I/O; a missing credential returns Unavailable immediately; any
    /// error (network, non-2xx, parse) is caught and reported as Unavailable,
    /// never propagated.
    pub async fn decide(
        &self,
        agent_id: AgentId,
        scored: &ScoredMarket,
        news_context: &[&NewsArticle],
        web_context: &[WebSearchResult],
    ) -> LlmOutcome {
        let cache_key = format!("{}:{}", agent_id.as_str(), scored.market.market_id);
        if let Some(decision) = self.cache.get(&cache_key) {
            return LlmOutcome::Decision(decision);
        }

        let Some(client) = self.clients.get(&agent_id) else {
            return LlmOutcome::Unavailable("unknown agent".to_string());
        };
        let Some(provider) = client.provider.as_ref() else {
            self.log_config_absent_once(agent_id);
            return LlmOutcome::Unavailable("no credential configured".to_string());
        };

        let (system, user) = assemble_prompt(scored, news_context, web_context);

        match provider.call(&system, &user).await {
            Ok(output) => match extract_and_validate(&output.content) {
                Ok(decision) => {
                    self.cache.set(cache_key, decision.clone());
                    LlmOutcome::Decision(decision)
                }
                Err(err) => {
                    warn!(agent = agent_id.as_str(), error = %err, "llm response failed validation");
                    LlmOutcome::Unavailable(err.to_string())
                }
            },
            Err(err) => {
                warn!(agent = agent_id.as_str(), error = %err, "llm call failed");
                LlmOutcome::Unavailable(err.to_string())
            }
        }
    }

    fn log_config_absent_once(&self, agent_id: AgentId) {
        let mut logged = self.config_absent_logged.lock();
        if logged.insert(agent_id) {
            warn!(agent = agent_id.as_str(), "no LLM credential configured; using deterministic fallback for all markets");
        }
    }

    pub fn invalidate(&self, agent_id: AgentId, market_id: &str) {
        self.cache.invalidate(&format!("{}:{}", agent_id.as_str(), market_id));
    }

    /// Whether this agent has a credential configured at all. Callers use
    /// this to skip building LLM context (web search) when `decide` would
    /// return `Unavailable` without making any call anyway.
    pub fn has_credential(&self, agent_id: AgentId) -> bool {
        self.clients
            .get(&agent_id)
            .map(|c| c.provider.is_some())
            .unwrap_or(false)
    }
}

fn assemble_prompt(
    scored: &ScoredMarket,
    news_context: &[&NewsArticle],
    web_context: &[WebSearchResult],
) -> (String, String) {
    let system = "You are a prediction-market trading analyst. Reply with a single JSON object \
        {\"side\": \"YES\"|\"NO\", \"confidence\": 0..1, \"reasoning\": [\"...\"]}. \
        Do not include any other text."
        .to_string();

    let mut bullets = String::new();
    for article in news_context.iter().take(5) {
        bullets.push_str(&format!("- {}: {}\n", article.source, article.title));
    }
    for result in web_context.iter().take(5) {
        bullets.push_str(&format!("- [web] {}: {}\n", result.title, result.snippet));
    }
    if bullets.is_empty() {
        bullets.push_str("- (no recent context available)\n");
    }

    let user = format!(
        "Market: {}\nCategory: {:?}\nCurrent probability: {:.3}\nVolume USD: {:.0}\nLiquidity USD: {:.0}\n24h price change: {:.3}\nScore: {:.1}\n\nContext:\n{bullets}\nReply with the JSON object described in the system prompt.",
        scored.market.question,
        scored.market.category,
        scored.market.current_probability,
        scored.market.volume_usd,
        scored.market.liquidity_usd,
        scored.market.price_change_24h,
        scored.score,
    );

    (system, user)
}

/// Extracts the first balanced `{...}` substring (tracking brace depth and
/// respecting quoted strings so braces inside string values don't confuse
/// the scan), then validates per spec.md §4.6.
pub fn extract_and_validate(raw: &str) -> Result<AITradeDecision> {
    let json_slice = extract_first_balanced_object(raw).ok_or_else(|| anyhow!("no JSON object found in LLM response"))?;
    let value: serde_json::Value = serde_json::from_str(json_slice).context("malformed JSON object")?;

    let side = value
        .get("side")
        .and_then(|v| v.as_str())
        .and_then(Side::parse_case_insensitive)
        .unwrap_or(Side::No);

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    let reasoning: Vec<String> = value
        .get("reasoning")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .take(MAX_REASONING_LINES)
                .collect()
        })
        .unwrap_or_default();

    Ok(AITradeDecision {
        side,
        confidence,
        reasoning,
    })
}

fn extract_first_balanced_object(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    let start = raw.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
