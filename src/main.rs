// =============================================================================
// Depth Heatmap — Main Entry Point
// =============================================================================
//
// Capture starts Inactive unless `autostart` is set. Operators drive the
// scheduler through the REST API; queries read the on-disk logs directly.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analytics;
mod api;
mod app_state;
mod binance;
mod capture;
mod error;
mod market_data;
mod runtime_config;
mod store;
mod types;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "capture_config.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Depth Heatmap starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, path = CONFIG_PATH, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    let config = config.validate()?;

    info!(
        symbols = ?config.symbols,
        interval_secs = config.capture_interval_seconds,
        depth = config.depth_limit,
        data_dir = %config.data_dir.display(),
        "Capture configuration"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let autostart = config.autostart;
    let state = Arc::new(AppState::new(config)?);

    if autostart {
        state.scheduler.start().await;
    }

    // ── 3. Serve the API until Ctrl+C ────────────────────────────────────
    let app = api::rest::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("Shutdown signal received, stopping capture");
        })
        .await?;

    // ── 4. Drain capture tasks ───────────────────────────────────────────
    state.scheduler.stop().await;
    info!("Depth Heatmap shut down complete.");
    Ok(())
}
