//! The synthetic trading engine: six deterministic-or-LLM-backed agents that
//! independently score, decide, size, and manage prediction-market positions
//! on a shared cycle. Every submodule here is a pure function or a narrow
//! adapter; `scheduler` is the only module that owns mutable state and wires
//! the rest together.

pub mod adaptive_tuner;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod fallback;
pub mod lifecycle;
pub mod llm;
pub mod market_adapter;
pub mod news;
pub mod observability;
pub mod persistence;
pub mod personality;
pub mod primitives;
pub mod scheduler;
pub mod scoring;
pub mod sizing;
pub mod stats;
pub mod trade_engine;
pub mod types;
pub mod websearch;

pub use errors::EngineError;
pub use scheduler::EngineState;
pub use types::{AgentId, Category};
