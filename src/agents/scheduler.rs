//! Cycle runner (spec.md §4.12). Owns every piece of process-wide state the
//! other `crate::agents` modules need and drives the per-cycle data flow:
//! fetch markets/news once, run every enabled agent concurrently with
//! per-agent failure isolation, then aggregate the consensus view. Grounded
//! on the donor's `main.rs` `AppState` (one large struct built once and
//! shared behind `Arc`) and its `DataSourceKillSwitch` "stop on consecutive
//! failure" instinct, generalized here into `ObservabilityWindow`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::adaptive_tuner;
use super::cache::AgentTradeCache;
use super::config::{default_agent_profiles, EngineConfig, ProfileOverrideStore, DEFAULT_STARTING_CAPITAL_USD};
use super::consensus::{self, TimeWindow as ConsensusWindow};
use super::errors::EngineError;
use super::fallback;
use super::lifecycle;
use super::llm::{LlmDecisionLayer, LlmOutcome};
use super::market_adapter::{MarketAdapter, MarketApiCredentials};
use super::news::NewsAggregator;
use super::observability::{cache_hit_ratio_gauge, drawdown_alert, AgentCycleOutcome, CycleRecord, ObservabilityWindow};
use super::persistence::PersistenceStore;
use super::scoring;
use super::trade_engine::{self, RawDecision};
use super::types::{
    now_ms, AgentId, AgentPortfolio, AgentProfile, ConsensusRecord, ExitReason, Market,
    MarketStatus, NewsArticle, Position, ScoredMarket, TimestampMs, Trade, TradeStatus,
};
use super::websearch::{build_web_search, WebSearchProvider};

/// Synthesizes a stand-in `Market` for a position whose market didn't come
/// back in the latest fetch (spec.md §8 scenario E), so the exit pass still
/// has something to evaluate TP/SL/timeout against. Probability is carried
/// over from the position's entry (the only "last-known" value a `Position`
/// retains) rather than guessed, and status is left `Active` so market-status
/// overrides don't spuriously fire during an outage.
fn unchanged_market_stand_in(market_id: &str, position: &Position) -> Market {
    Market {
        market_id: market_id.to_string(),
        question: String::new(),
        category: position.category,
        volume_usd: 0.0,
        liquidity_usd: 0.0,
        current_probability: position.entry_probability,
        price_change_24h: 0.0,
        status: MarketStatus::Active,
        resolved_outcome: None,
    }
}

/// Drawdown at which a fresh cooldown begins (spec.md §4.9 step 7 / scenario F).
const COOLDOWN_DRAWDOWN_TRIGGER: f64 = 0.40;
/// Drawdown below which an active cooldown clears early.
const COOLDOWN_DRAWDOWN_RECOVERY: f64 = 0.30;
/// How many trailing cycle records `ObservabilityWindow` retains.
const OBSERVABILITY_WINDOW_CAPACITY: usize = 500;

/// Everything the engine needs to run a cycle, built once in `main` and
/// shared behind `Arc` with the read API (spec.md §5 "Shared resource
/// policy").
pub struct EngineState {
    pub config: EngineConfig,
    market_adapter: MarketAdapter,
    news_aggregator: NewsAggregator,
    web_search: Box<dyn WebSearchProvider>,
    llm: LlmDecisionLayer,
    pub persistence: Arc<dyn PersistenceStore>,
    pub agent_trade_cache: AgentTradeCache,
    override_store: RwLock<ProfileOverrideStore>,
    observability: Mutex<ObservabilityWindow>,
    consensus_cache: RwLock<Vec<ConsensusRecord>>,
    cycle_in_flight: AtomicBool,
    started_at: TimestampMs,
}

impl EngineState {
    pub fn new(http: reqwest::Client, config: EngineConfig, persistence: Arc<dyn PersistenceStore>) -> Self {
        let llm_ttl = config.ai_cache_ttl;
        Self {
            market_adapter: MarketAdapter::new(http.clone(), MarketApiCredentials::from_env()),
            news_aggregator: NewsAggregator::new(http.clone()),
            web_search: build_web_search(http.clone()),
            llm: LlmDecisionLayer::from_env(http, llm_ttl),
            agent_trade_cache: AgentTradeCache::new(config.agent_trade_cache_ttl),
            override_store: RwLock::new(ProfileOverrideStore::default()),
            observability: Mutex::new(ObservabilityWindow::new(OBSERVABILITY_WINDOW_CAPACITY)),
            consensus_cache: RwLock::new(Vec::new()),
            cycle_in_flight: AtomicBool::new(false),
            started_at: now_ms(),
            config,
            persistence,
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (now_ms() - self.started_at) / 1000
    }

    pub fn enabled_profiles(&self) -> Vec<AgentProfile> {
        let store = self.override_store.read();
        store
            .apply(default_agent_profiles())
            .into_iter()
            .filter(|p| p.enabled)
            .collect()
    }

    pub fn profile_for(&self, agent_id: AgentId) -> Option<AgentProfile> {
        let store = self.override_store.read();
        store
            .apply(default_agent_profiles())
            .into_iter()
            .find(|p| p.agent_id == agent_id)
    }

    pub fn consensus(&self) -> Vec<ConsensusRecord> {
        self.consensus_cache.read().clone()
    }

    pub fn market_cache_stats(&self) -> super::stats::AdapterCacheStats {
        self.market_adapter.cache_stats()
    }

    pub fn news_cache_stats(&self) -> super::stats::AdapterCacheStats {
        self.news_aggregator.cache_stats()
    }

    /// Runs the cycle loop forever: once on startup, then every
    /// `config.interval_ms` (spec.md §4.12).
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            self.run_cycle().await;
            tokio::time::sleep(Duration::from_millis(self.config.interval_ms)).await;
        }
    }

    /// Runs the adaptive-tuner background loop forever, on its own (much
    /// slower) cadence (spec.md §4.13).
    pub async fn run_adaptive_tuner_forever(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.adaptive_tuner_interval).await;
            self.run_adaptive_tuner_pass().await;
        }
    }

    async fn run_adaptive_tuner_pass(&self) {
        for agent_id in AgentId::ALL {
            let portfolio = match self.persistence.get_portfolio(agent_id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(err) => {
                    warn!(agent = agent_id.as_str(), error = %err, "adaptive tuner: could not load portfolio");
                    continue;
                }
            };
            let trades = match self.persistence.load_trades(agent_id, None).await {
                Ok(t) => t,
                Err(err) => {
                    warn!(agent = agent_id.as_str(), error = %err, "adaptive tuner: could not load trades");
                    continue;
                }
            };
            let (config, bias) = adaptive_tuner::tune_agent(agent_id, &trades, portfolio.starting_capital_usd, now_ms());
            if let Err(err) = self.persistence.save_adaptive_config(agent_id, config, bias).await {
                warn!(agent = agent_id.as_str(), error = %err, "adaptive tuner: could not persist tuned config");
            }
        }
        info!("adaptive tuner pass complete");
    }

    /// Runs one full cycle, or does nothing if a cycle is already in flight
    /// (spec.md §4.12: "at most one cycle in flight").
    pub async fn run_cycle(self: &Arc<Self>) -> Option<CycleRecord> {
        if self.cycle_in_flight.swap(true, Ordering::AcqRel) {
            warn!("skipping cycle tick: previous cycle still running");
            return None;
        }
        let record = self.run_cycle_inner().await;
        self.cycle_in_flight.store(false, Ordering::Release);
        Some(record)
    }

    async fn run_cycle_inner(self: &Arc<Self>) -> CycleRecord {
        let started_at = now_ms();
        let wall_clock_start = Instant::now();

        let market_before = self.market_adapter.cache_stats();
        let news_before = self.news_aggregator.cache_stats();
        let (markets, news) = tokio::join!(
            self.market_adapter.fetch_all_markets(),
            self.news_aggregator.fetch_latest_news(),
        );
        let market_after = self.market_adapter.cache_stats();
        let news_after = self.news_aggregator.cache_stats();
        cache_hit_ratio_gauge("market", market_after.hit_ratio());
        cache_hit_ratio_gauge("news", news_after.hit_ratio());

        // A cache *hit* also leaves `last_refresh_at` unchanged, so gating on
        // that alone misattributes a stale `last_error` to every healthy
        // cache-hit cycle. Gate on an actual refresh attempt having happened
        // this cycle (the miss counter moved) that then failed to land a new
        // refresh (refresh_at still unchanged).
        let markets_attempted_refresh = market_after.misses != market_before.misses;
        let markets_fetch_error = (markets_attempted_refresh
            && market_after.last_refresh_at == market_before.last_refresh_at)
            .then(|| market_after.last_error.clone())
            .flatten();
        let news_attempted_refresh = news_after.misses != news_before.misses;
        let news_fetch_error = (news_attempted_refresh
            && news_after.last_refresh_at == news_before.last_refresh_at)
            .then(|| news_after.last_error.clone())
            .flatten();

        let profiles = self.enabled_profiles();
        let markets = Arc::new(markets);
        let news = Arc::new(news);

        let mut handles = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let shared = Arc::clone(self);
            let markets = Arc::clone(&markets);
            let news = Arc::clone(&news);
            handles.push((
                profile.agent_id,
                tokio::spawn(async move { shared.run_agent_cycle(profile, markets, news, started_at).await }),
            ));
        }

        let mut agents = Vec::with_capacity(handles.len());
        for (agent_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => AgentCycleOutcome {
                    agent_id,
                    candidate_markets: 0,
                    new_trades: 0,
                    closed_trades: 0,
                    open_positions: 0,
                    error: Some(format!("agent cycle task failed: {join_err}")),
                },
            };
            agents.push(outcome);
        }

        self.refresh_consensus().await;

        let record = CycleRecord {
            started_at,
            cycle_ms: wall_clock_start.elapsed().as_millis() as u64,
            agents,
            markets_fetch_error,
            news_fetch_error,
        };
        record.emit();
        self.observability.lock().push(record.clone());
        record
    }

    /// Rebuilds the consensus/leaderboard snapshot from every agent's current
    /// portfolio and open trades (spec.md §4.14); called once per cycle after
    /// every agent's per-cycle mutations have landed.
    async fn refresh_consensus(&self) {
        let mut portfolios = Vec::with_capacity(AgentId::ALL.len());
        let mut open_trades = Vec::new();
        for agent_id in AgentId::ALL {
            match self.persistence.get_portfolio(agent_id).await {
                Ok(Some(portfolio)) => {
                    drawdown_alert(agent_id, portfolio.max_drawdown_pct(), COOLDOWN_DRAWDOWN_TRIGGER);
                    portfolios.push(portfolio);
                }
                Ok(None) => {}
                Err(err) => warn!(agent = agent_id.as_str(), error = %err, "consensus: could not load portfolio"),
            }
            if let Ok(trades) = self.persistence.load_trades(agent_id, None).await {
                open_trades.extend(trades.into_iter().filter(|t| t.status == TradeStatus::Open));
            }
        }
        let consensus = consensus::build_consensus_with_confidence(&portfolios, &open_trades);
        *self.consensus_cache.write() = consensus;
    }

    /// Read-path trade lookup that consults the agent trade cache first
    /// (spec.md §4.11) before falling back to persistence. The read API is
    /// the only other caller of `AgentTradeCache` besides the scheduler
    /// itself, which populates and invalidates it during cycles.
    pub async fn load_trades_cached(&self, agent_id: AgentId) -> Result<Vec<Trade>, EngineError> {
        let portfolio = self.persistence.get_portfolio(agent_id).await?;
        let mut sorted_market_ids: Vec<String> = portfolio
            .map(|p| p.open_positions.into_keys().collect())
            .unwrap_or_default();
        sorted_market_ids.sort();

        if let Some(cached) = self.agent_trade_cache.get(agent_id.as_str(), &sorted_market_ids) {
            return Ok(cached);
        }

        self.persistence.load_trades(agent_id, None).await
    }

    pub async fn agent_metrics(&self, agent_id: AgentId, window: ConsensusWindow) -> Result<super::consensus::AgentMetrics, EngineError> {
        let portfolio = self
            .persistence
            .get_portfolio(agent_id)
            .await?
            .unwrap_or_else(|| AgentPortfolio::new(agent_id, DEFAULT_STARTING_CAPITAL_USD));
        let trades = self.persistence.load_trades(agent_id, None).await?;
        Ok(consensus::agent_metrics(&portfolio, &trades, window, now_ms()))
    }

    async fn run_agent_cycle(
        self: Arc<Self>,
        agent: AgentProfile,
        markets: Arc<Vec<Market>>,
        news: Arc<Vec<NewsArticle>>,
        now: TimestampMs,
    ) -> AgentCycleOutcome {
        match self.run_agent_cycle_inner(&agent, &markets, &news, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(agent = agent.agent_id.as_str(), error = %err, "agent cycle failed, portfolio held at last persisted state");
                AgentCycleOutcome {
                    agent_id: agent.agent_id,
                    candidate_markets: 0,
                    new_trades: 0,
                    closed_trades: 0,
                    open_positions: 0,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn run_agent_cycle_inner(
        &self,
        agent: &AgentProfile,
        markets: &[Market],
        news: &[NewsArticle],
        now: TimestampMs,
    ) -> Result<AgentCycleOutcome, EngineError> {
        let agent_id = agent.agent_id;

        let mut portfolio = self
            .persistence
            .get_portfolio(agent_id)
            .await?
            .unwrap_or_else(|| AgentPortfolio::new(agent_id, DEFAULT_STARTING_CAPITAL_USD));

        let adaptive = self.persistence.get_adaptive_config(agent_id).await?;
        let risk_multiplier = adaptive.as_ref().map(|(cfg, _)| cfg.risk_multiplier);
        let category_bias = adaptive.map(|(_, bias)| bias);

        let market_index: HashMap<&str, &Market> = markets.iter().map(|m| (m.market_id.as_str(), m)).collect();

        let existing_trades = self.persistence.load_trades(agent_id, None).await?;
        let mut open_trade_by_market: HashMap<String, Trade> = existing_trades
            .into_iter()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| (t.market_id.clone(), t))
            .collect();

        let mut closed_trades = 0usize;
        let mut new_trades = 0usize;
        let mut seed_index = 0u64;

        // Exit pass: every open position is re-evaluated every cycle, even
        // one whose market didn't come back in this fetch (treated as
        // unchanged, spec.md §8 scenario E) — a missing market still goes
        // through `evaluate_exit` against a synthesized unchanged-probability
        // stand-in so timeout/score-decay still fire during an outage.
        let open_market_ids: Vec<String> = portfolio.open_positions.keys().cloned().collect();
        for market_id in open_market_ids {
            let position = match portfolio.open_positions.get(&market_id) {
                Some(p) => p.clone(),
                None => continue,
            };

            let (market_owned, latest_score) = match market_index.get(market_id.as_str()).copied() {
                Some(market) => {
                    let score = scoring::score_market(market, news, agent, category_bias.as_ref(), now).score;
                    (market.clone(), Some(score))
                }
                None => (unchanged_market_stand_in(&market_id, &position), Some(position.entry_score)),
            };

            let Some(eval) = lifecycle::evaluate_exit(&position, &market_owned, latest_score, now) else {
                continue;
            };

            let pnl = lifecycle::realized_pnl(&position, &eval);
            self.close_position(&mut portfolio, &mut open_trade_by_market, &market_id, pnl, eval.reason, now)
                .await?;
            closed_trades += 1;
        }

        // Entry/flip pass: score every filtered candidate, highest score
        // first, and either flip an existing position or open a new one
        // within the agent's remaining slots (spec.md §4.9 steps 5-7).
        let candidates = scoring::filter_candidates(markets, agent);
        let mut scored: Vec<ScoredMarket> = candidates
            .iter()
            .map(|m| scoring::score_market(m, news, agent, category_bias.as_ref(), now))
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let cooldown_active = portfolio.cooldown_until.map(|until| now < until).unwrap_or(false);
        let mut available_slots = agent.max_trades.saturating_sub(portfolio.open_positions.len());

        if !cooldown_active {
            for candidate in &scored {
                let market_id = candidate.market.market_id.clone();

                if let Some(position) = portfolio.open_positions.get(&market_id).cloned() {
                    let decision = self.decide_market(agent, candidate, news, seed_index).await;
                    seed_index += 1;
                    if lifecycle::should_flip(&position, decision.side, decision.confidence, self.config.flip_confidence_threshold) {
                        let exit_probability = candidate.market.current_probability;
                        let pnl = position.side.direction() * (exit_probability - position.entry_probability) * position.size_usd;
                        self.close_position(&mut portfolio, &mut open_trade_by_market, &market_id, pnl, ExitReason::Manual, now)
                            .await?;
                        closed_trades += 1;

                        if available_slots > 0 {
                            if let Some(built) = trade_engine::build_trade(agent, candidate, decision, &portfolio, risk_multiplier, seed_index, now) {
                                self.open_position(&mut portfolio, built.trade).await?;
                                available_slots -= 1;
                                new_trades += 1;
                            }
                        }
                    }
                    continue;
                }

                if available_slots == 0 {
                    continue;
                }

                let decision = self.decide_market(agent, candidate, news, seed_index).await;
                seed_index += 1;
                if let Some(built) = trade_engine::build_trade(agent, candidate, decision, &portfolio, risk_multiplier, seed_index, now) {
                    self.open_position(&mut portfolio, built.trade).await?;
                    available_slots -= 1;
                    new_trades += 1;
                }
            }
        }

        portfolio.unrealized_pnl_usd = portfolio
            .open_positions
            .values()
            .map(|p| {
                let current_probability = market_index.get(p.market_id.as_str()).map(|m| m.current_probability).unwrap_or(p.entry_probability);
                lifecycle::unrealized_pnl(p, current_probability)
            })
            .sum();
        portfolio.bump_max_equity();

        let drawdown = portfolio.max_drawdown_pct();
        match portfolio.cooldown_until {
            None if drawdown >= COOLDOWN_DRAWDOWN_TRIGGER => {
                portfolio.cooldown_until = Some(now + self.config.cooldown_duration.as_millis() as i64);
                warn!(agent = agent_id.as_str(), drawdown, "entering drawdown cooldown");
            }
            Some(until) if drawdown < COOLDOWN_DRAWDOWN_RECOVERY || now >= until => {
                portfolio.cooldown_until = None;
                info!(agent = agent_id.as_str(), "cooldown cleared");
            }
            _ => {}
        }

        portfolio.last_updated = now;
        self.persistence.save_portfolio(portfolio.clone()).await?;

        let all_trades = self.persistence.load_trades(agent_id, None).await?;
        let mut sorted_market_ids: Vec<String> = portfolio.open_positions.keys().cloned().collect();
        sorted_market_ids.sort();
        self.agent_trade_cache.set(agent_id.as_str(), all_trades, sorted_market_ids);

        Ok(AgentCycleOutcome {
            agent_id,
            candidate_markets: scored.len(),
            new_trades,
            closed_trades,
            open_positions: portfolio.open_positions.len(),
            error: None,
        })
    }

    /// Closes `market_id`'s position: re-keys the open trade from its
    /// open-lifetime id (`agentId:marketId`) to its permanent archival id
    /// (spec.md §3: `hash(agentId, marketId, openedAt)`) and saves it closed,
    /// then deletes the now-vacated open-key record. Re-keying is what lets
    /// the same market be re-entered later in the *same* cycle (a flip, or a
    /// fresh entry after a TP/SL close): without it, the next open write
    /// would reuse the archived trade's id and collide with its CLOSED
    /// status (spec.md §4.15 rejects CLOSED -> OPEN). Folds the realized PnL
    /// into the portfolio. A missing open trade (should not happen in
    /// practice) still removes the in-memory position rather than leaving it
    /// dangling.
    async fn close_position(
        &self,
        portfolio: &mut AgentPortfolio,
        open_trade_by_market: &mut HashMap<String, Trade>,
        market_id: &str,
        pnl: f64,
        reason: ExitReason,
        now: TimestampMs,
    ) -> Result<(), EngineError> {
        if let Some(open_trade) = open_trade_by_market.remove(market_id) {
            let old_trade_id = open_trade.trade_id.clone();
            let archival_id = Trade::closed_key(open_trade.agent_id, market_id, open_trade.opened_at);
            let closed_trade = Trade {
                trade_id: archival_id.clone(),
                status: TradeStatus::Closed,
                pnl_usd: Some(pnl),
                closed_at: Some(now),
                exit_reason: Some(reason),
                ..open_trade
            };
            self.persistence.save_trade(closed_trade).await?;
            if old_trade_id != archival_id {
                self.persistence.delete_trade(&old_trade_id).await?;
            }
        }
        portfolio.realized_pnl_usd += pnl;
        portfolio.open_positions.remove(market_id);
        self.agent_trade_cache.invalidate(portfolio.agent_id.as_str());
        Ok(())
    }

    async fn open_position(&self, portfolio: &mut AgentPortfolio, trade: Trade) -> Result<(), EngineError> {
        self.persistence.save_trade(trade.clone()).await?;
        portfolio.open_positions.insert(
            trade.market_id.clone(),
            Position {
                market_id: trade.market_id.clone(),
                side: trade.side,
                size_usd: trade.size_usd,
                entry_probability: trade.entry_probability,
                entry_score: trade.entry_score,
                opened_at: trade.opened_at,
                category: trade.category,
            },
        );
        self.agent_trade_cache.invalidate(portfolio.agent_id.as_str());
        Ok(())
    }

    /// LLM-or-fallback decision for one candidate (spec.md §4.6/§4.7). Skips
    /// building web-search context entirely when the agent has no LLM
    /// credential configured, since `decide` would return `Unavailable`
    /// without making a call anyway.
    async fn decide_market(&self, agent: &AgentProfile, candidate: &ScoredMarket, news: &[NewsArticle], index: u64) -> RawDecision {
        let top_news = scoring::top_keyword_matches(&candidate.market.question, news, 5);

        let web_context = if self.llm.has_credential(agent.agent_id) {
            self.web_search.search(&candidate.market.question).await
        } else {
            Vec::new()
        };

        match self.llm.decide(agent.agent_id, candidate, &top_news, &web_context).await {
            LlmOutcome::Decision(decision) => RawDecision {
                side: decision.side,
                confidence: decision.confidence,
                reasoning: decision.reasoning,
            },
            LlmOutcome::Unavailable(_) => {
                let seed = super::primitives::seed(agent.agent_id.as_str(), &candidate.market.market_id, index);
                let fallback = fallback::decide_fallback(candidate, agent, &seed);
                RawDecision {
                    side: fallback.side,
                    confidence: fallback.confidence,
                    reasoning: fallback.reasoning,
                }
            }
        }
    }
}
