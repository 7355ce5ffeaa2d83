//! Prediction arena: six independent agents run a synthetic trading cycle
//! against real prediction-market and news adapters, with a read-only HTTP
//! API over the resulting portfolios, trades, and leaderboard.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prediction_arena::agents::config::EngineConfig;
use prediction_arena::agents::persistence::MemoryStore;
use prediction_arena::agents::EngineState;
use prediction_arena::api;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env();
    init_tracing(config.debug);

    info!(mode = ?config.mode, "prediction arena starting");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let persistence = Arc::new(MemoryStore::new());
    let port = config.port;
    let state = Arc::new(EngineState::new(http_client, config, persistence));

    // The cycle loop and the (much slower) adaptive-tuner loop run for the
    // lifetime of the process alongside the HTTP server.
    tokio::spawn(Arc::clone(&state).run_forever());
    tokio::spawn(Arc::clone(&state).run_adaptive_tuner_forever());

    let app = Router::new()
        .route("/healthz", get(api::get_health))
        .route("/api/agents/summary", get(api::get_agents_summary))
        .route("/api/agents/:agentId/trades", get(api::get_agent_trades))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .route("/metrics", get(move || async move { prometheus_handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "api server listening");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "prediction_arena=debug,tower_http=debug"
    } else {
        "prediction_arena=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
