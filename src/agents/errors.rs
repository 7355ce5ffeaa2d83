//! Error taxonomy (spec.md §7). Adapters and the persistence trait return
//! `anyhow::Result<T>` at their boundary (donor convention throughout
//! `scrapers/*` and `vault/*`); the scheduler classifies a caught error into
//! one of these variants for the cycle record. Nothing escapes `run_cycle`
//! as a panic or bare `Result::Err`.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("configuration absent: {0}")]
    ConfigurationAbsent(String),

    #[error("cap exceeded: {0}")]
    CapExceeded(String),

    #[error("drawdown stop: {0}")]
    DrawdownStop(String),

    #[error("cooldown active until {until_ms}")]
    Cooldown { until_ms: i64 },

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    pub fn from_anyhow_upstream(err: &anyhow::Error) -> Self {
        EngineError::UpstreamTransient(err.to_string())
    }
}
