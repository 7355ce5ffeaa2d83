//! End-to-end scenarios (spec.md §8) exercised against the in-memory
//! persistence adapter and the deterministic fallback decision path — no
//! network, no real LLM credentials, so these run fully offline and
//! reproducibly. Each `#[tokio::test]` builds its own `MemoryStore` rather
//! than sharing process state across scenarios.

use std::sync::Arc;

use prediction_arena::agents::cache::AgentTradeCache;
use prediction_arena::agents::config::{default_agent_profiles, EngineConfig};
use prediction_arena::agents::consensus::{self, TimeWindow};
use prediction_arena::agents::fallback;
use prediction_arena::agents::lifecycle;
use prediction_arena::agents::persistence::{MemoryStore, PersistenceStore};
use prediction_arena::agents::primitives::seed as build_seed;
use prediction_arena::agents::scoring;
use prediction_arena::agents::trade_engine::{self, RawDecision};
use prediction_arena::agents::types::{
    AgentId, AgentPortfolio, AgentProfile, Category, ExitReason, Market, MarketStatus, Position,
    Side, Trade, TradeStatus,
};
use prediction_arena::agents::EngineState;

fn profile(agent_id: AgentId) -> AgentProfile {
    default_agent_profiles()
        .into_iter()
        .find(|p| p.agent_id == agent_id)
        .expect("every agent id has a default profile")
}

fn active_market(market_id: &str, probability: f64) -> Market {
    Market {
        market_id: market_id.to_string(),
        question: "Will the Grok 4 launch event ship on schedule?".to_string(),
        category: Category::Tech,
        volume_usd: 250_000.0,
        liquidity_usd: 60_000.0,
        current_probability: probability,
        price_change_24h: 0.06,
        status: MarketStatus::Active,
        resolved_outcome: None,
    }
}

async fn engine_state(store: Arc<dyn PersistenceStore>) -> Arc<EngineState> {
    let config = EngineConfig::from_env();
    let http = reqwest::Client::new();
    Arc::new(EngineState::new(http, config, store))
}

/// Scenario A: cold start, a single qualifying candidate, no LLM credential
/// configured — the engine must fall through to the deterministic fallback
/// decision, size a trade, and persist it as the agent's first open position.
#[tokio::test]
async fn scenario_a_cold_start_single_candidate_llm_absent() {
    let store = MemoryStore::new();
    let agent = profile(AgentId::Grok4);

    // No portfolio has ever been saved for this agent: cold start.
    assert!(store.get_portfolio(agent.agent_id).await.unwrap().is_none());
    let mut portfolio = AgentPortfolio::new(agent.agent_id, 3000.0);

    let market = active_market("market-launch", 0.55);
    let candidates = scoring::filter_candidates(&[market.clone()], &agent);
    assert_eq!(candidates.len(), 1, "the single market should pass the volume/liquidity/status gate");

    let scored = scoring::score_market(candidates[0], &[], &agent, None, 0);

    // LLM absent: the scheduler would see `LlmOutcome::Unavailable` and reach
    // for this same deterministic path.
    let seed = build_seed(agent.agent_id.as_str(), &market.market_id, 0);
    let fallback_decision = fallback::decide_fallback(&scored, &agent, &seed);
    let decision = RawDecision {
        side: fallback_decision.side,
        confidence: fallback_decision.confidence,
        reasoning: fallback_decision.reasoning,
    };

    let built = trade_engine::build_trade(&agent, &scored, decision, &portfolio, None, 0, 1_000)
        .expect("a fresh 3000 USD portfolio with a qualifying candidate should size a tradeable position");

    assert_eq!(built.trade.status, TradeStatus::Open);
    assert_eq!(built.trade.trade_id, "GROK_4:market-launch");
    assert!(built.trade.size_usd > 0.0);

    store.save_trade(built.trade.clone()).await.unwrap();
    portfolio.open_positions.insert(
        market.market_id.clone(),
        Position {
            market_id: market.market_id.clone(),
            side: built.trade.side,
            size_usd: built.trade.size_usd,
            entry_probability: built.trade.entry_probability,
            entry_score: built.trade.entry_score,
            opened_at: built.trade.opened_at,
            category: built.trade.category,
        },
    );
    store.save_portfolio(portfolio.clone()).await.unwrap();

    let reloaded = store.get_portfolio(agent.agent_id).await.unwrap().unwrap();
    assert_eq!(reloaded.open_positions.len(), 1);
    let trades = store.load_trades(agent.agent_id, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Open);
}

/// Scenario B: an open YES position whose market probability climbs past the
/// take-profit threshold closes with positive realized PnL, and the resulting
/// closed trade is idempotent under a repeated identical save.
#[tokio::test]
async fn scenario_b_take_profit_closes_with_positive_pnl() {
    let store = MemoryStore::new();
    let agent_id = AgentId::Gpt5;

    let position = Position {
        market_id: "market-tp".to_string(),
        side: Side::Yes,
        size_usd: 200.0,
        entry_probability: 0.50,
        entry_score: 60.0,
        opened_at: 0,
        category: Category::Economy,
    };
    let open_trade = Trade {
        trade_id: Trade::open_key(agent_id, &position.market_id),
        agent_id,
        market_id: position.market_id.clone(),
        side: position.side,
        size_usd: position.size_usd,
        entry_probability: position.entry_probability,
        entry_score: position.entry_score,
        confidence: 0.65,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: 0,
        closed_at: None,
        exit_reason: None,
        reasoning: vec!["deterministic fallback".to_string()],
        seed: "GPT_5:market-tp:0".to_string(),
        category: position.category,
    };
    store.save_trade(open_trade.clone()).await.unwrap();

    let market = active_market("market-tp", 0.90);
    let eval = lifecycle::evaluate_exit(&position, &market, None, 10_000).expect("0.90 clears the YES take-profit threshold");
    assert_eq!(eval.reason, ExitReason::TakeProfit);

    let pnl = lifecycle::realized_pnl(&position, &eval);
    assert_eq!(pnl, 80.0); // +1 * (0.90 - 0.50) * 200

    let closed_trade = Trade {
        status: TradeStatus::Closed,
        pnl_usd: Some(pnl),
        closed_at: Some(10_000),
        exit_reason: Some(eval.reason),
        ..open_trade.clone()
    };
    store.save_trade(closed_trade.clone()).await.unwrap();

    // Re-saving the identical closed trade must be a no-op (spec.md §4.15).
    store.save_trade(closed_trade).await.unwrap();

    let trades = store.load_trades(agent_id, None).await.unwrap();
    assert_eq!(trades.len(), 1, "idempotent save must not duplicate the trade");
    assert_eq!(trades[0].status, TradeStatus::Closed);
    assert_eq!(trades[0].pnl_usd, Some(80.0));
}

/// Scenario C: the mirror of B — a YES position whose probability collapses
/// past the stop-loss threshold closes with negative realized PnL.
#[tokio::test]
async fn scenario_c_stop_loss_closes_with_negative_pnl() {
    let position = Position {
        market_id: "market-sl".to_string(),
        side: Side::Yes,
        size_usd: 150.0,
        entry_probability: 0.60,
        entry_score: 55.0,
        opened_at: 0,
        category: Category::Crypto,
    };
    let market = active_market("market-sl", 0.30);

    let eval = lifecycle::evaluate_exit(&position, &market, None, 5_000).expect("0.30 clears the YES stop-loss threshold");
    assert_eq!(eval.reason, ExitReason::StopLoss);

    let pnl = lifecycle::realized_pnl(&position, &eval);
    assert_eq!(pnl, -45.0); // +1 * (0.30 - 0.60) * 150
    assert!(pnl < 0.0);
}

/// Scenario D: six agents hold positions on the same market, five YES and one
/// NO. The consensus aggregator must report majority side, agreement ratio,
/// averaged confidence from open trades, and no conflict flag (agreement
/// clears the conflict threshold).
#[tokio::test]
async fn scenario_d_consensus_across_six_agents() {
    let market_id = "market-consensus";
    let mut portfolios = Vec::new();
    let mut open_trades = Vec::new();

    for (i, agent_id) in AgentId::ALL.into_iter().enumerate() {
        let side = if agent_id == AgentId::Qwen25 { Side::No } else { Side::Yes };
        let mut portfolio = AgentPortfolio::new(agent_id, 3000.0);
        portfolio.open_positions.insert(
            market_id.to_string(),
            Position {
                market_id: market_id.to_string(),
                side,
                size_usd: 100.0,
                entry_probability: 0.55,
                entry_score: 60.0,
                opened_at: 0,
                category: Category::Tech,
            },
        );
        portfolios.push(portfolio);

        open_trades.push(Trade {
            trade_id: Trade::open_key(agent_id, market_id),
            agent_id,
            market_id: market_id.to_string(),
            side,
            size_usd: 100.0,
            entry_probability: 0.55,
            entry_score: 60.0,
            confidence: 0.5 + (i as f64) * 0.05,
            status: TradeStatus::Open,
            pnl_usd: None,
            opened_at: 0,
            closed_at: None,
            exit_reason: None,
            reasoning: vec![],
            seed: format!("{}:{}:0", agent_id.as_str(), market_id),
            category: Category::Tech,
        });
    }

    let records = consensus::build_consensus_with_confidence(&portfolios, &open_trades);
    let record = records.iter().find(|r| r.market_id == market_id).unwrap();

    assert_eq!(record.yes_count, 5);
    assert_eq!(record.no_count, 1);
    assert_eq!(record.side, Side::Yes);
    assert!((record.agreement - 0.8333).abs() < 0.001);
    assert!(!record.conflict, "5-1 agreement clears the conflict threshold");

    let expected_avg_confidence: f64 = open_trades.iter().map(|t| t.confidence).sum::<f64>() / open_trades.len() as f64;
    assert!((record.avg_confidence - expected_avg_confidence).abs() < 1e-9);
}

/// Scenario E: upstream-failure isolation. A persistence write that violates
/// the CLOSED -> OPEN invariant for one agent must not affect another agent's
/// already-persisted state — the trade engine treats each agent's failure as
/// independent, per spec.md §4.12's per-agent join-based isolation.
#[tokio::test]
async fn scenario_e_one_agents_persistence_failure_does_not_affect_another() {
    let store = MemoryStore::new();

    let mut grok_closed = Trade {
        trade_id: Trade::open_key(AgentId::Grok4, "market-shared"),
        agent_id: AgentId::Grok4,
        market_id: "market-shared".to_string(),
        side: Side::Yes,
        size_usd: 120.0,
        entry_probability: 0.5,
        entry_score: 50.0,
        confidence: 0.6,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: 0,
        closed_at: None,
        exit_reason: None,
        reasoning: vec![],
        seed: "GROK_4:market-shared:0".to_string(),
        category: Category::Tech,
    };
    store.save_trade(grok_closed.clone()).await.unwrap();
    grok_closed.status = TradeStatus::Closed;
    grok_closed.pnl_usd = Some(10.0);
    grok_closed.closed_at = Some(1_000);
    store.save_trade(grok_closed.clone()).await.unwrap();

    // Attempting to reopen Grok's now-closed trade must be rejected...
    let mut reopen_attempt = grok_closed.clone();
    reopen_attempt.status = TradeStatus::Open;
    reopen_attempt.pnl_usd = None;
    reopen_attempt.closed_at = None;
    let err = store.save_trade(reopen_attempt).await.unwrap_err();
    assert!(matches!(err, prediction_arena::agents::EngineError::InvariantViolation(_)));

    // ...while a wholly unrelated agent's trade and portfolio writes succeed.
    let gpt5_trade = Trade {
        trade_id: Trade::open_key(AgentId::Gpt5, "market-unrelated"),
        agent_id: AgentId::Gpt5,
        market_id: "market-unrelated".to_string(),
        side: Side::No,
        size_usd: 90.0,
        entry_probability: 0.4,
        entry_score: 45.0,
        confidence: 0.55,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: 0,
        closed_at: None,
        exit_reason: None,
        reasoning: vec![],
        seed: "GPT_5:market-unrelated:0".to_string(),
        category: Category::Economy,
    };
    store.save_trade(gpt5_trade).await.unwrap();
    store.save_portfolio(AgentPortfolio::new(AgentId::Gpt5, 3000.0)).await.unwrap();

    // Grok's state is exactly as it was before the rejected reopen: still
    // closed, still carrying its original realized PnL.
    let grok_trades = store.load_trades(AgentId::Grok4, None).await.unwrap();
    assert_eq!(grok_trades.len(), 1);
    assert_eq!(grok_trades[0].status, TradeStatus::Closed);
    assert_eq!(grok_trades[0].pnl_usd, Some(10.0));

    let gpt5_trades = store.load_trades(AgentId::Gpt5, None).await.unwrap();
    assert_eq!(gpt5_trades.len(), 1);
    assert_eq!(gpt5_trades[0].status, TradeStatus::Open);
    assert!(store.get_portfolio(AgentId::Gpt5).await.unwrap().is_some());
}

/// Scenario F: drawdown cooldown. Once an agent's equity has drawn down 40%
/// or more from its peak, the cycle must gate entries (no new trade opens,
/// even against a market that would otherwise score and size a candidate)
/// until the drawdown recovers below the lower hysteresis band.
#[tokio::test]
async fn scenario_f_drawdown_cooldown_gates_new_entries() {
    let agent = profile(AgentId::Qwen25);

    let mut portfolio = AgentPortfolio::new(agent.agent_id, 3000.0);
    portfolio.max_equity_usd = 3000.0;
    portfolio.realized_pnl_usd = -1300.0; // equity 1700, drawdown ~43%
    assert!(portfolio.max_drawdown_pct() >= 0.40);

    // Same cooldown trigger the scheduler applies per cycle (spec.md §4.9
    // step 7 / §4.12): once tripped, it holds until recovery or expiry.
    const COOLDOWN_DRAWDOWN_TRIGGER: f64 = 0.40;
    const COOLDOWN_DRAWDOWN_RECOVERY: f64 = 0.30;
    let now = 10_000_000_i64;
    if portfolio.cooldown_until.is_none() && portfolio.max_drawdown_pct() >= COOLDOWN_DRAWDOWN_TRIGGER {
        portfolio.cooldown_until = Some(now + 24 * 3_600 * 1000);
    }
    assert!(portfolio.cooldown_until.is_some());

    let cooldown_active = portfolio.cooldown_until.map(|until| now < until).unwrap_or(false);
    assert!(cooldown_active);

    // A market that would otherwise be a perfectly good candidate.
    let market = active_market("market-during-cooldown", 0.55);
    let scored = scoring::score_market(&market, &[], &agent, None, now);
    let seed = build_seed(agent.agent_id.as_str(), &market.market_id, 0);
    let fallback_decision = fallback::decide_fallback(&scored, &agent, &seed);
    let decision = RawDecision {
        side: fallback_decision.side,
        confidence: fallback_decision.confidence,
        reasoning: fallback_decision.reasoning,
    };

    // The cycle's entry pass is skipped entirely while cooldown is active
    // (spec.md §4.9 step 7); a candidate is never even scored against sizing.
    let would_open = if cooldown_active {
        None
    } else {
        trade_engine::build_trade(&agent, &scored, decision, &portfolio, None, 0, now)
    };
    assert!(would_open.is_none(), "no new position should open while the agent is in drawdown cooldown");

    // Equity recovers above the lower band: cooldown clears next cycle.
    portfolio.realized_pnl_usd = -500.0; // drawdown ~16.7%, below recovery band
    assert!(portfolio.max_drawdown_pct() < COOLDOWN_DRAWDOWN_RECOVERY);
    if let Some(until) = portfolio.cooldown_until {
        if portfolio.max_drawdown_pct() < COOLDOWN_DRAWDOWN_RECOVERY || now >= until {
            portfolio.cooldown_until = None;
        }
    }
    assert!(portfolio.cooldown_until.is_none());
}

/// Exercises the read-path helpers `EngineState` exposes to the HTTP API
/// (spec.md §4.18): the agent trade cache is consulted and the summary
/// metrics aggregate correctly over a persisted portfolio, all without any
/// network adapter call.
#[tokio::test]
async fn read_path_helpers_serve_from_persistence_and_cache() {
    let store = Arc::new(MemoryStore::new());
    let agent_id = AgentId::Claude45;

    let mut portfolio = AgentPortfolio::new(agent_id, 3000.0);
    let trade = Trade {
        trade_id: Trade::open_key(agent_id, "market-read"),
        agent_id,
        market_id: "market-read".to_string(),
        side: Side::Yes,
        size_usd: 100.0,
        entry_probability: 0.5,
        entry_score: 50.0,
        confidence: 0.6,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: 0,
        closed_at: None,
        exit_reason: None,
        reasoning: vec![],
        seed: "CLAUDE_4_5:market-read:0".to_string(),
        category: Category::Politics,
    };
    store.save_trade(trade.clone()).await.unwrap();
    portfolio.open_positions.insert(
        "market-read".to_string(),
        Position {
            market_id: "market-read".to_string(),
            side: trade.side,
            size_usd: trade.size_usd,
            entry_probability: trade.entry_probability,
            entry_score: trade.entry_score,
            opened_at: trade.opened_at,
            category: trade.category,
        },
    );
    store.save_portfolio(portfolio).await.unwrap();

    let state = engine_state(Arc::clone(&store)).await;

    let trades = state.load_trades_cached(agent_id).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].trade_id, trade.trade_id);

    let metrics = state.agent_metrics(agent_id, TimeWindow::AllTime).await.unwrap();
    assert_eq!(metrics.trades_count, 1);
    assert_eq!(metrics.agent_id, Some(agent_id));

    // A never-touched agent still resolves to a synthetic fresh portfolio
    // rather than an error.
    let fresh = state.agent_metrics(AgentId::DeepseekV3, TimeWindow::AllTime).await.unwrap();
    assert_eq!(fresh.trades_count, 0);
    assert_eq!(fresh.current_capital_usd, 3000.0);
}

/// Sanity check that the `AgentTradeCache` the read path and scheduler both
/// rely on actually memoizes by identity of the open-position-market-id set,
/// not by wall-clock alone.
#[tokio::test]
async fn agent_trade_cache_hits_on_identical_open_market_ids() {
    let cache = AgentTradeCache::new(std::time::Duration::from_secs(30));
    let agent = AgentId::Grok4;
    let trades = vec![Trade {
        trade_id: "GROK_4:m1".to_string(),
        agent_id: agent,
        market_id: "m1".to_string(),
        side: Side::Yes,
        size_usd: 50.0,
        entry_probability: 0.5,
        entry_score: 40.0,
        confidence: 0.5,
        status: TradeStatus::Open,
        pnl_usd: None,
        opened_at: 0,
        closed_at: None,
        exit_reason: None,
        reasoning: vec![],
        seed: "GROK_4:m1:0".to_string(),
        category: Category::Crypto,
    }];

    assert!(cache.get(agent.as_str(), &["m1".to_string()]).is_none());
    cache.set(agent.as_str(), trades.clone(), vec!["m1".to_string()]);
    let hit = cache.get(agent.as_str(), &["m1".to_string()]).expect("identical market-id set should hit");
    assert_eq!(hit.len(), 1);

    cache.invalidate(agent.as_str());
    assert!(cache.get(agent.as_str(), &["m1".to_string()]).is_none());
}
