//! Process-wide caches (spec.md §4.11, §5 "Shared resource policy"). Each
//! cache is an explicit object owned by its adapter, initialized once at
//! process start — donor pattern is the module-level `lazy_static` caches in
//! `scrapers/*`, generalized here into an explicit struct per the "shared
//! module-level caches become explicit cache objects" redesign note in
//! spec.md §9. Concurrent reads are lock-free-ish (short `parking_lot`
//! critical sections); writes are serialized per key via the same lock,
//! matching the donor's preference for `parking_lot::RwLock` over
//! `tokio::sync::RwLock` for short critical sections (see `vault/llm.rs`
//! callers and `main.rs`'s `AppState`).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use super::types::Trade;

/// A single cached value with return-by-identity semantics: two reads within
/// the TTL window return the same `Arc`-free clone, and an expired or absent
/// entry is indistinguishable to the caller (spec.md §5).
struct Entry<V> {
    value: V,
    cached_at: Instant,
}

/// Single-slot TTL cache for whole-collection adapters (markets, news): one
/// logical "the current snapshot" value, refreshed wholesale.
pub struct SingleTtlCache<V: Clone> {
    ttl: Duration,
    slot: RwLock<Option<Entry<V>>>,
}

impl<V: Clone> SingleTtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached value if still fresh.
    pub fn get_fresh(&self) -> Option<V> {
        let guard = self.slot.read();
        match guard.as_ref() {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Returns the cached value regardless of freshness (used for the
    /// stale-on-upstream-failure fallback in spec.md §4.2/§4.3).
    pub fn get_stale(&self) -> Option<V> {
        self.slot.read().as_ref().map(|e| e.value.clone())
    }

    pub fn set(&self, value: V) {
        *self.slot.write() = Some(Entry {
            value,
            cached_at: Instant::now(),
        });
    }

    pub fn is_populated(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Per-key TTL cache used for the AI decision cache (`agentId:marketId`) and
/// any other keyed, read-mostly map.
pub struct KeyedTtlCache<K: Eq + Hash + Clone, V: Clone> {
    ttl: Duration,
    map: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedTtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let guard = self.map.read();
        match guard.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.map.write().insert(
            key,
            Entry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.map.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }
}

/// Per-agent memoized trade set (spec.md §4.11). A hit requires both freshness
/// *and* that the currently observed sorted market-id list matches the one
/// the cached trades were computed against — a market-set change invalidates
/// the cache even within the TTL window.
pub struct AgentTradeCache {
    ttl: Duration,
    empty_grace: Duration,
    entries: RwLock<HashMap<String, AgentTradeCacheEntry>>,
}

struct AgentTradeCacheEntry {
    trades: Vec<Trade>,
    generated_at: Instant,
    sorted_market_ids: Vec<String>,
}

impl AgentTradeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            empty_grace: Duration::from_secs(10),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a cache hit iff: within TTL, the sorted market-id list matches,
    /// and (if the cached set is empty) it is at least `empty_grace` old —
    /// an empty result younger than that is treated as transient, per the
    /// spec's explicit heuristic.
    pub fn get(&self, agent_id: &str, current_sorted_market_ids: &[String]) -> Option<Vec<Trade>> {
        let guard = self.entries.read();
        let entry = guard.get(agent_id)?;
        if entry.generated_at.elapsed() >= self.ttl {
            return None;
        }
        if entry.sorted_market_ids != current_sorted_market_ids {
            return None;
        }
        if entry.trades.is_empty() && entry.generated_at.elapsed() < self.empty_grace {
            return None;
        }
        Some(entry.trades.clone())
    }

    pub fn set(&self, agent_id: &str, trades: Vec<Trade>, sorted_market_ids: Vec<String>) {
        self.entries.write().insert(
            agent_id.to_string(),
            AgentTradeCacheEntry {
                trades,
                generated_at: Instant::now(),
                sorted_market_ids,
            },
        );
    }

    /// Explicit invalidation on a mutation event (spec.md §4.11: "tighten to 0
    /// on mutation events").
    pub fn invalidate(&self, agent_id: &str) {
        self.entries.write().remove(agent_id);
    }
}
