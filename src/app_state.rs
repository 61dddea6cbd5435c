// =============================================================================
// Central Application State
// =============================================================================
//
// Owns the frozen config, the snapshot store and the capture scheduler. The
// scheduler is the only holder of mutable capture state; handlers reach it
// through `Arc<AppState>` rather than through globals.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;

use crate::binance::BinanceClient;
use crate::capture::{CaptureScheduler, CaptureSettings};
use crate::market_data::SnapshotFetcher;
use crate::runtime_config::RuntimeConfig;
use crate::store::SnapshotStore;

pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub store: Arc<SnapshotStore>,
    pub scheduler: Arc<CaptureScheduler>,
    /// Instant the process started; used for uptime.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the state around an arbitrary fetcher.
    pub fn with_fetcher(config: RuntimeConfig, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(SnapshotStore::new(config.data_dir.clone()));

        let settings = CaptureSettings {
            symbols: config.symbols.clone(),
            depth_limit: config.depth_limit,
            interval: config.capture_interval(),
        };
        let scheduler = Arc::new(CaptureScheduler::new(settings, fetcher, Arc::clone(&store)));

        Self {
            config,
            store,
            scheduler,
            start_time: std::time::Instant::now(),
        }
    }

    /// Wire the state around the Binance REST client.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let client = BinanceClient::new(config.api_base_url.clone(), config.request_timeout())?;
        Ok(Self::with_fetcher(config, Arc::new(client)))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
