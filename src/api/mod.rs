//! Read API surface (spec.md §6, SPEC_FULL.md §4.18). Donor pattern: thin
//! axum handlers over `AxumState<Arc<EngineState>>`, `Query`/`Json` extractors,
//! `Result<Json<T>, StatusCode>` returns (see the old `routes.rs`).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::agents::config::DEFAULT_STARTING_CAPITAL_USD;
use crate::agents::consensus::TimeWindow;
use crate::agents::types::{now_ms, AgentId, AgentPortfolio, ConsensusRecord, Trade, TradeStatus};
use crate::agents::EngineState;

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub agent_id: String,
    pub trades: Vec<Trade>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

/// `GET /api/agents/:agentId/trades` (spec.md §6). Per spec.md §7: an
/// internal error degrades to a minimal shape with empty arrays and a
/// generic error string rather than a 5xx; only an unknown `agentId` is a
/// 4xx (invalid input).
pub async fn get_agent_trades(
    Path(agent_id_raw): Path<String>,
    Query(params): Query<TradesQuery>,
    AxumState(state): AxumState<Arc<EngineState>>,
) -> Result<Json<TradesResponse>, StatusCode> {
    let agent_id = AgentId::from_frontend_id(&agent_id_raw).ok_or(StatusCode::NOT_FOUND)?;

    let trades = match state.load_trades_cached(agent_id).await {
        Ok(mut trades) => {
            match params.status.as_deref() {
                Some(s) if s.eq_ignore_ascii_case("open") => trades.retain(|t| t.status == TradeStatus::Open),
                Some(s) if s.eq_ignore_ascii_case("closed") => trades.retain(|t| t.status == TradeStatus::Closed),
                _ => {}
            }
            return Ok(Json(TradesResponse {
                agent_id: agent_id.frontend_id().to_string(),
                count: trades.len(),
                trades,
                error: None,
            }));
        }
        Err(_) => Vec::new(),
    };

    Ok(Json(TradesResponse {
        agent_id: agent_id.frontend_id().to_string(),
        count: trades.len(),
        trades,
        error: Some("failed to load trades"),
    }))
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub display_name: String,
    pub equity_usd: f64,
    pub realized_pnl_usd: f64,
    pub unrealized_pnl_usd: f64,
    pub max_drawdown_pct: f64,
    pub open_positions: usize,
    pub cooldown_active: bool,
    pub win_rate_7d: f64,
    pub trades_7d: usize,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub agents: Vec<AgentSummary>,
    pub consensus: Vec<ConsensusRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

/// `GET /api/agents/summary` (spec.md §6 leaderboard view, SPEC_FULL.md
/// §4.14 consensus). Per spec.md §7, a per-agent load failure degrades that
/// agent out of the list (with a generic error string attached) rather than
/// failing the whole response with a 5xx.
pub async fn get_agents_summary(AxumState(state): AxumState<Arc<EngineState>>) -> Json<SummaryResponse> {
    let mut agents = Vec::with_capacity(AgentId::ALL.len());
    let mut any_error = false;

    for agent_id in AgentId::ALL {
        let Some(profile) = state.profile_for(agent_id) else {
            continue;
        };

        let portfolio = match state.persistence.get_portfolio(agent_id).await {
            Ok(p) => p.unwrap_or_else(|| AgentPortfolio::new(agent_id, DEFAULT_STARTING_CAPITAL_USD)),
            Err(_) => {
                any_error = true;
                continue;
            }
        };

        let metrics = match state.agent_metrics(agent_id, TimeWindow::Last7Days).await {
            Ok(m) => m,
            Err(_) => {
                any_error = true;
                continue;
            }
        };

        agents.push(AgentSummary {
            agent_id: agent_id.frontend_id().to_string(),
            display_name: profile.display_name,
            equity_usd: portfolio.equity_usd(),
            realized_pnl_usd: portfolio.realized_pnl_usd,
            unrealized_pnl_usd: portfolio.unrealized_pnl_usd,
            max_drawdown_pct: portfolio.max_drawdown_pct(),
            open_positions: portfolio.open_positions.len(),
            cooldown_active: portfolio.cooldown_until.map(|until| now_ms() < until).unwrap_or(false),
            win_rate_7d: metrics.win_rate,
            trades_7d: metrics.trades_count,
        });
    }

    Json(SummaryResponse {
        agents,
        consensus: state.consensus(),
        error: any_error.then_some("failed to load some agent state"),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub market_cache: crate::agents::stats::AdapterCacheStats,
    pub news_cache: crate::agents::stats::AdapterCacheStats,
}

/// `GET /healthz` — liveness + adapter cache visibility for operators.
pub async fn get_health(AxumState(state): AxumState<Arc<EngineState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        market_cache: state.market_cache_stats(),
        news_cache: state.news_cache_stats(),
    })
}
