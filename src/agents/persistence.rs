//! Persistence adapter (spec.md §4.15). Storage-agnostic trait; the only
//! implementation in this engine is an in-memory `MemoryStore` guarded by
//! `parking_lot::RwLock` (the donor's preference for `parking_lot` over
//! `tokio::sync::RwLock` for short critical sections — see `vault/vault_db.rs`
//! and `main.rs`'s `AppState`). A durable backend (the donor uses SQLite via
//! `vault_db.rs`) could be added behind the same trait without touching
//! callers; DESIGN.md records this as an intentionally deferred swap, not a
//! missing feature — spec.md §4.15 explicitly allows an in-memory adapter for
//! dev/test.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::errors::EngineError;
use super::types::{AdaptiveConfig, AgentId, AgentPortfolio, CategoryBias, Trade, TradeStatus};

/// Optional chronological window filter for `load_trades` (spec.md §4.15).
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub since_ms: i64,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_portfolio(&self, portfolio: AgentPortfolio) -> Result<(), EngineError>;
    async fn get_portfolio(&self, agent_id: AgentId) -> Result<Option<AgentPortfolio>, EngineError>;

    /// Idempotent upsert by `tradeId` (spec.md §4.15): a write that would
    /// transition CLOSED -> CLOSED or OPEN -> OPEN identically is a no-op;
    /// a write attempting to reopen a CLOSED trade is rejected with
    /// `InvariantViolation`.
    async fn save_trade(&self, trade: Trade) -> Result<(), EngineError>;

    /// Removes a trade record outright. Used only when a close re-keys a
    /// trade from its open-lifetime id (`agentId:marketId`) to its permanent
    /// archival id, to free the open-key slot rather than leave a stale
    /// dangling OPEN record behind it under the old key.
    async fn delete_trade(&self, trade_id: &str) -> Result<(), EngineError>;

    async fn load_trades(&self, agent_id: AgentId, window: Option<TimeWindow>) -> Result<Vec<Trade>, EngineError>;

    async fn get_adaptive_config(&self, agent_id: AgentId) -> Result<Option<(AdaptiveConfig, CategoryBias)>, EngineError>;
    async fn save_adaptive_config(&self, agent_id: AgentId, config: AdaptiveConfig, bias: CategoryBias) -> Result<(), EngineError>;
}

#[derive(Default)]
pub struct MemoryStore {
    portfolios: RwLock<HashMap<AgentId, AgentPortfolio>>,
    trades: RwLock<HashMap<String, Trade>>,
    adaptive: RwLock<HashMap<AgentId, (AdaptiveConfig, CategoryBias)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_portfolio(&self, portfolio: AgentPortfolio) -> Result<(), EngineError> {
        self.portfolios.write().insert(portfolio.agent_id, portfolio);
        Ok(())
    }

    async fn get_portfolio(&self, agent_id: AgentId) -> Result<Option<AgentPortfolio>, EngineError> {
        Ok(self.portfolios.read().get(&agent_id).cloned())
    }

    async fn save_trade(&self, trade: Trade) -> Result<(), EngineError> {
        let mut trades = self.trades.write();
        if let Some(existing) = trades.get(&trade.trade_id) {
            if existing.status == TradeStatus::Closed && trade.status == TradeStatus::Open {
                return Err(EngineError::InvariantViolation(format!(
                    "attempted to reopen closed trade {}",
                    trade.trade_id
                )));
            }
            if existing.status == trade.status && existing.pnl_usd == trade.pnl_usd {
                return Ok(());
            }
        }
        trades.insert(trade.trade_id.clone(), trade);
        Ok(())
    }

    async fn delete_trade(&self, trade_id: &str) -> Result<(), EngineError> {
        self.trades.write().remove(trade_id);
        Ok(())
    }

    async fn load_trades(&self, agent_id: AgentId, window: Option<TimeWindow>) -> Result<Vec<Trade>, EngineError> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .values()
            .filter(|t| t.agent_id == agent_id)
            .filter(|t| window.map(|w| t.opened_at >= w.since_ms).unwrap_or(true))
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.opened_at);
        Ok(trades)
    }

    async fn get_adaptive_config(&self, agent_id: AgentId) -> Result<Option<(AdaptiveConfig, CategoryBias)>, EngineError> {
        Ok(self.adaptive.read().get(&agent_id).cloned())
    }

    async fn save_adaptive_config(&self, agent_id: AgentId, config: AdaptiveConfig, bias: CategoryBias) -> Result<(), EngineError> {
        self.adaptive.write().insert(agent_id, (config, bias));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{now_ms, Category, ExitReason, Side};

    fn open_trade(trade_id: &str) -> Trade {
        Trade {
            trade_id: trade_id.to_string(),
            agent_id: AgentId::Grok4,
            market_id: "m1".into(),
            side: Side::Yes,
            size_usd: 100.0,
            entry_probability: 0.5,
            entry_score: 50.0,
            confidence: 0.6,
            status: TradeStatus::Open,
            pnl_usd: None,
            opened_at: now_ms(),
            closed_at: None,
            exit_reason: None::<ExitReason>,
            reasoning: vec![],
            seed: "seed".into(),
            category: Category::Crypto,
        }
    }

    #[tokio::test]
    async fn saving_same_trade_twice_is_idempotent() {
        let store = MemoryStore::new();
        let trade = open_trade("t1");
        store.save_trade(trade.clone()).await.unwrap();
        store.save_trade(trade).await.unwrap();
        let loaded = store.load_trades(AgentId::Grok4, None).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn reopening_a_closed_trade_is_rejected() {
        let store = MemoryStore::new();
        let mut closed = open_trade("t2");
        closed.status = TradeStatus::Closed;
        closed.pnl_usd = Some(10.0);
        closed.closed_at = Some(now_ms());
        store.save_trade(closed).await.unwrap();

        let reopen = open_trade("t2");
        let result = store.save_trade(reopen).await;
        assert!(matches!(result, Err(EngineError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn load_trades_is_chronological() {
        let store = MemoryStore::new();
        let mut t1 = open_trade("a");
        t1.opened_at = 200;
        let mut t2 = open_trade("b");
        t2.opened_at = 100;
        store.save_trade(t1).await.unwrap();
        store.save_trade(t2).await.unwrap();
        let loaded = store.load_trades(AgentId::Grok4, None).await.unwrap();
        assert_eq!(loaded[0].trade_id, "b");
        assert_eq!(loaded[1].trade_id, "a");
    }

    #[tokio::test]
    async fn portfolio_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_portfolio(AgentId::Grok4).await.unwrap().is_none());
        let portfolio = AgentPortfolio::new(AgentId::Grok4, 3000.0);
        store.save_portfolio(portfolio).await.unwrap();
        assert!(store.get_portfolio(AgentId::Grok4).await.unwrap().is_some());
    }
}
