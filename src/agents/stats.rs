//! Shared adapter cache-stats shape (SPEC_FULL.md §4.2 supplement): "every
//! adapter in this engine exposes the same shape so the alert predicates in
//! §4.16 can be generic over adapters."

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::types::now_ms;

#[derive(Debug, Clone, Default)]
pub struct AdapterCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub last_refresh_at: Option<i64>,
    pub last_error: Option<String>,
    pub rejected_count: u64,
}

impl AdapterCacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct AdapterStats {
    hits: AtomicU64,
    misses: AtomicU64,
    last_refresh_at: AtomicI64,
    last_error: RwLock<Option<String>>,
    rejected_count: AtomicU64,
}

impl Default for AdapterStats {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_refresh_at: AtomicI64::new(0),
            last_error: RwLock::new(None),
            rejected_count: AtomicU64::new(0),
        }
    }
}

impl AdapterStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.last_refresh_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl ToString) {
        *self.last_error.write() = Some(err.to_string());
    }

    pub fn record_rejected(&self, n: u64) {
        self.rejected_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdapterCacheStats {
        let last_refresh_at = self.last_refresh_at.load(Ordering::Relaxed);
        AdapterCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            last_refresh_at: (last_refresh_at != 0).then_some(last_refresh_at),
            last_error: self.last_error.read().clone(),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            return 0.0;
        }
        hits / (hits + misses)
    }
}
