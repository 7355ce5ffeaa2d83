//! Observability (spec.md §4.16). Every cycle emits one structured record
//! through `tracing`; counters live in a `metrics` registry (donor depends on
//! `metrics` + `metrics-exporter-prometheus`), exposing cycle duration,
//! per-adapter cache hit-ratio, per-agent open-positions gauges, equity and
//! drawdown. Alert predicates are plain functions over recent cycle records,
//! mirroring the donor's `DataSourceKillSwitch` "consecutive failure" counter
//! pattern in `main.rs`.

use std::collections::VecDeque;
use metrics::{counter, gauge, histogram};
use tracing::{error, info, warn};

use super::types::{AgentId, TimestampMs};

#[derive(Debug, Clone)]
pub struct AgentCycleOutcome {
    pub agent_id: AgentId,
    pub candidate_markets: usize,
    pub new_trades: usize,
    pub closed_trades: usize,
    pub open_positions: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub started_at: TimestampMs,
    pub cycle_ms: u64,
    pub agents: Vec<AgentCycleOutcome>,
    pub markets_fetch_error: Option<String>,
    pub news_fetch_error: Option<String>,
}

impl CycleRecord {
    pub fn total_candidate_markets(&self) -> usize {
        self.agents.iter().map(|a| a.candidate_markets).sum()
    }

    pub fn total_new_trades(&self) -> usize {
        self.agents.iter().map(|a| a.new_trades).sum()
    }

    /// Emits the cycle as a single structured `tracing` record plus one
    /// per-agent line for anything that failed (spec.md §4.16: "optional
    /// error" per agent, never a panic).
    pub fn emit(&self) {
        info!(
            cycle_ms = self.cycle_ms,
            candidate_markets = self.total_candidate_markets(),
            new_trades = self.total_new_trades(),
            agents = self.agents.len(),
            "trading cycle complete"
        );
        histogram!("prediction_arena_cycle_duration_ms").record(self.cycle_ms as f64);
        counter!("prediction_arena_new_trades_total").increment(self.total_new_trades() as u64);
        counter!("prediction_arena_closed_trades_total")
            .increment(self.agents.iter().map(|a| a.closed_trades as u64).sum());

        for agent in &self.agents {
            let agent_label = agent.agent_id.as_str();
            gauge!("prediction_arena_agent_open_positions", "agent" => agent_label)
                .set(agent.open_positions as f64);
            gauge!("prediction_arena_agent_candidate_markets", "agent" => agent_label)
                .set(agent.candidate_markets as f64);
            if let Some(err) = &agent.error {
                counter!("prediction_arena_agent_cycle_errors_total", "agent" => agent_label).increment(1);
                error!(agent = agent_label, error = %err, "agent cycle failed, portfolio held at last persisted state");
            }
        }
    }
}

/// Rolling window of recent cycle records, used only to evaluate the alert
/// predicates below. Bounded so memory doesn't grow unbounded over a
/// long-running process.
pub struct ObservabilityWindow {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl ObservabilityWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// "N consecutive adapter failures" (spec.md §4.16).
    pub fn consecutive_adapter_failures(&self) -> usize {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.markets_fetch_error.is_some() || r.news_fetch_error.is_some())
            .count()
    }

    /// "all agents have candidateMarkets = 0 for > T" (spec.md §4.16), `t`
    /// expressed as a count of trailing cycles to check.
    pub fn all_agents_starved_for(&self, cycles: usize) -> bool {
        if self.records.len() < cycles || cycles == 0 {
            return false;
        }
        self.records
            .iter()
            .rev()
            .take(cycles)
            .all(|r| !r.agents.is_empty() && r.agents.iter().all(|a| a.candidate_markets == 0))
    }
}

/// "any agent at or above max-drawdown stop" (spec.md §4.16): evaluated
/// directly against live portfolio state, not the cycle-record window.
pub fn drawdown_alert(agent_id: AgentId, max_drawdown_pct: f64, threshold: f64) {
    gauge!("prediction_arena_agent_drawdown_pct", "agent" => agent_id.as_str()).set(max_drawdown_pct);
    if max_drawdown_pct >= threshold {
        warn!(agent = agent_id.as_str(), max_drawdown_pct, threshold, "agent at or above max-drawdown stop");
    }
}

/// Publishes the current hit-ratio for one adapter cache (spec.md §4.16
/// "per-adapter cache hit-ratio gauges").
pub fn cache_hit_ratio_gauge(adapter_label: &'static str, hit_ratio: f64) {
    gauge!("prediction_arena_adapter_cache_hit_ratio", "adapter" => adapter_label).set(hit_ratio);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(candidate_markets: usize, markets_err: Option<&str>) -> CycleRecord {
        CycleRecord {
            started_at: 0,
            cycle_ms: 10,
            agents: vec![AgentCycleOutcome {
                agent_id: AgentId::Grok4,
                candidate_markets,
                new_trades: 0,
                closed_trades: 0,
                open_positions: 0,
                error: None,
            }],
            markets_fetch_error: markets_err.map(|s| s.to_string()),
            news_fetch_error: None,
        }
    }

    #[test]
    fn counts_consecutive_trailing_adapter_failures() {
        let mut window = ObservabilityWindow::new(10);
        window.push(record(5, None));
        window.push(record(5, Some("timeout")));
        window.push(record(5, Some("timeout")));
        assert_eq!(window.consecutive_adapter_failures(), 2);
    }

    #[test]
    fn detects_all_agents_starved() {
        let mut window = ObservabilityWindow::new(10);
        window.push(record(0, None));
        window.push(record(0, None));
        assert!(window.all_agents_starved_for(2));
        assert!(!window.all_agents_starved_for(3));
    }
}
