//! HTTP server lifecycle and router construction.
//!
//! Exposes `GET /api/stats` with the miner's counters and rates, plus a
//! `GET /health` liveness probe. Read-only; binds to localhost by
//! default.

use std::sync::Arc;

use anyhow::Result;
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::engine::stats::Stats;
use crate::tracing::prelude::*;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind the API server to.
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4068".to_string(),
        }
    }
}

/// Pool connection status published by the daemon for the API.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub host: String,
    pub port: u16,
    pub worker: String,
    pub difficulty: f64,
}

/// Shared application state available to all handlers.
#[derive(Clone)]
struct SharedState {
    stats: Arc<Stats>,
    pool_rx: watch::Receiver<PoolStatus>,
}

#[derive(Serialize)]
struct StatsResponse {
    miner: &'static str,
    version: &'static str,
    algorithm: &'static str,
    uptime: u64,
    hashrate: HashrateSection,
    shares: SharesSection,
    pool: PoolStatus,
    hardware: HardwareSection,
    total_hashes: u64,
}

#[derive(Serialize)]
struct HashrateSection {
    total: f64,
    threads: Vec<f64>,
}

#[derive(Serialize)]
struct SharesSection {
    accepted: u64,
    rejected: u64,
    submitted: u64,
}

#[derive(Serialize)]
struct HardwareSection {
    threads: usize,
    /// Sensor readings come from an external collaborator; absent here.
    temp: Option<f64>,
    power: Option<f64>,
    efficiency: Option<f64>,
}

/// Start the API server.
///
/// Runs until the provided cancellation token is triggered.
pub async fn serve(
    config: ApiConfig,
    shutdown: CancellationToken,
    stats: Arc<Stats>,
    pool_rx: watch::Receiver<PoolStatus>,
) -> Result<()> {
    let app = build_router(stats, pool_rx);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(url = %format!("http://{actual_addr}/api/stats"), "API server listening");

    if !actual_addr.ip().is_loopback() {
        warn!(
            "API server is bound to a non-localhost address ({}). \
             This exposes the API to the network without authentication.",
            actual_addr.ip()
        );
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    Ok(())
}

/// Build the application router with all API routes.
fn build_router(stats: Arc<Stats>, pool_rx: watch::Receiver<PoolStatus>) -> Router {
    let state = SharedState { stats, pool_rx };

    Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    use std::sync::atomic::Ordering;

    let stats = &state.stats;
    let pool = state.pool_rx.borrow().clone();

    Json(StatsResponse {
        miner: "verusmine",
        version: env!("CARGO_PKG_VERSION"),
        algorithm: "verushash2.2",
        uptime: stats.uptime_secs(),
        hashrate: HashrateSection {
            total: stats.total_rate() as f64,
            threads: stats.thread_rates().iter().map(|&r| r as f64).collect(),
        },
        shares: SharesSection {
            accepted: stats.shares_accepted.load(Ordering::Relaxed),
            rejected: stats.shares_rejected.load(Ordering::Relaxed),
            submitted: stats.shares_submitted.load(Ordering::Relaxed),
        },
        hardware: HardwareSection {
            threads: stats.thread_count(),
            temp: None,
            power: None,
            efficiency: None,
        },
        total_hashes: stats.total_hashes(),
        pool,
    })
}
