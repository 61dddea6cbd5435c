// =============================================================================
// Capture Scheduler — one cooperative sampling task per tracked symbol
// =============================================================================
//
// Global state machine: Stopped -> Started -> Stopped.
//
//   start()  resets every symbol's logs, then spawns one task per symbol.
//            A second start() while Started is a no-op returning `false`.
//   stop()   flips the watch channel, then awaits every task. A task only
//            observes cancellation between cycles (before a fetch, or while
//            parked on the inter-cycle sleep), so an in-flight fetch/append
//            always completes. Once stop() returns no task can append again.
//   status() pure read of the global flag.
//
// Each task loops: fetch depth -> fetch price -> append both sides -> sleep.
// Failures are logged and recorded in the ledger; they never end the loop.
//
// start()/stop()/capture_once() serialise on one async mutex, so a log never
// has two writers. capture_once() refuses a symbol whose scheduled task is
// alive. Only configured symbols get ledger entries.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::ledger::CaptureLedger;
use crate::error::{CaptureError, StoreError};
use crate::market_data::{PriceLevel, SnapshotFetcher};
use crate::store::SnapshotStore;
use crate::types::{normalize_symbol, CaptureStatus, Side, SnapshotRecord};

/// Wall-clock format of the `datetime_local` column.
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Static capture settings shared by every job.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub symbols: Vec<String>,
    pub depth_limit: u32,
    pub interval: Duration,
}

/// Result of one successful capture cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub symbol: String,
    pub capture_time: i64,
    pub local_time: String,
    pub market_price: f64,
    pub bid_levels: usize,
    pub ask_levels: usize,
}

/// Mutable scheduler state; only touched under the scheduler's mutex.
#[derive(Default)]
struct SchedulerState {
    cancel: Option<watch::Sender<bool>>,
    tasks: HashMap<String, JoinHandle<()>>,
}

/// Everything one capture task needs. Cheap to clone.
#[derive(Clone)]
struct CaptureJob {
    symbol: String,
    /// Configured symbol; outcomes are recorded in the ledger.
    tracked: bool,
    depth_limit: u32,
    interval: Duration,
    fetcher: Arc<dyn SnapshotFetcher>,
    store: Arc<SnapshotStore>,
    ledger: Arc<CaptureLedger>,
}

/// Supervisor owning the per-symbol task table and the global start flag.
pub struct CaptureScheduler {
    settings: CaptureSettings,
    fetcher: Arc<dyn SnapshotFetcher>,
    store: Arc<SnapshotStore>,
    ledger: Arc<CaptureLedger>,
    running: AtomicBool,
    state: Mutex<SchedulerState>,
}

impl CaptureScheduler {
    pub fn new(
        settings: CaptureSettings,
        fetcher: Arc<dyn SnapshotFetcher>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            store,
            ledger: Arc::new(CaptureLedger::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &CaptureLedger {
        &self.ledger
    }

    fn job(&self, symbol: String) -> CaptureJob {
        CaptureJob {
            tracked: self.settings.symbols.contains(&symbol),
            symbol,
            depth_limit: self.settings.depth_limit,
            interval: self.settings.interval,
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
        }
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Start capturing every configured symbol. Returns `false` if already
    /// started.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        if self.running.load(Ordering::SeqCst) {
            debug!("capture scheduler already started");
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        for symbol in &self.settings.symbols {
            let job = self.job(symbol.clone());
            if let Err(e) = job.store.reset(&job.symbol) {
                error!(symbol = %job.symbol, error = %e, "log reset failed, symbol not scheduled");
                self.ledger.record_failure(&job.symbol, e.to_string());
                continue;
            }
            let key = job.symbol.clone();
            let handle = tokio::spawn(run_capture_loop(job, cancel_rx.clone()));
            state.tasks.insert(key, handle);
        }

        state.cancel = Some(cancel_tx);
        self.running.store(true, Ordering::SeqCst);

        info!(
            symbols = ?self.settings.symbols,
            interval_secs = self.settings.interval.as_secs_f64(),
            depth = self.settings.depth_limit,
            "capture scheduler started"
        );
        true
    }

    /// Stop every task and wait for it to exit. Returns `false` if the
    /// scheduler was not running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(cancel) = state.cancel.take() {
            let _ = cancel.send(true);
        }

        let tasks: Vec<(String, JoinHandle<()>)> = state.tasks.drain().collect();
        let (symbols, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (symbol, result) in symbols.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(symbol = %symbol, error = %e, "capture task ended abnormally");
            }
        }

        if was_running {
            info!("capture scheduler stopped");
        }
        was_running
    }

    pub fn status(&self) -> CaptureStatus {
        if self.running.load(Ordering::SeqCst) {
            CaptureStatus::Active
        } else {
            CaptureStatus::Inactive
        }
    }

    /// Symbols whose capture task is still alive, sorted.
    pub async fn active_symbols(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut symbols: Vec<String> = state
            .tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Run a single capture for `symbol` right now, outside the schedule.
    ///
    /// Fails with `SymbolBusy` while the symbol's scheduled task is alive; the
    /// scheduler lock is held for the whole capture so no task can start
    /// writing the same log meanwhile.
    pub async fn capture_once(&self, symbol: &str) -> Result<CaptureReport, CaptureError> {
        let symbol = normalize_symbol(symbol).ok_or_else(|| StoreError::InvalidSymbol {
            symbol: symbol.to_string(),
        })?;

        let state = self.state.lock().await;
        if state.tasks.get(&symbol).is_some_and(|h| !h.is_finished()) {
            return Err(CaptureError::SymbolBusy(symbol));
        }

        let job = self.job(symbol);
        let result = capture_cycle(&job).await;
        drop(state);

        match &result {
            Ok(report) => info!(
                symbol = %report.symbol,
                bids = report.bid_levels,
                asks = report.ask_levels,
                "manual capture complete"
            ),
            Err(e) => warn!(symbol = %job.symbol, error = %e, "manual capture failed"),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Task body
// ---------------------------------------------------------------------------

async fn run_capture_loop(job: CaptureJob, mut cancel: watch::Receiver<bool>) {
    info!(symbol = %job.symbol, "capture task started");

    loop {
        if *cancel.borrow() {
            break;
        }

        match capture_cycle(&job).await {
            Ok(report) => debug!(
                symbol = %report.symbol,
                bids = report.bid_levels,
                asks = report.ask_levels,
                market_price = report.market_price,
                "capture cycle complete"
            ),
            Err(e) => warn!(symbol = %job.symbol, error = %e, "capture cycle failed, retrying next interval"),
        }

        tokio::select! {
            _ = tokio::time::sleep(job.interval) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(symbol = %job.symbol, "capture task exited");
}

/// Fetch one snapshot and append both sides. Records the outcome in the ledger.
async fn capture_cycle(job: &CaptureJob) -> Result<CaptureReport, CaptureError> {
    let result = fetch_and_append(job).await;
    if job.tracked {
        match &result {
            Ok(report) => job
                .ledger
                .record_success(&job.symbol, report.capture_time, report.market_price),
            Err(e) => job.ledger.record_failure(&job.symbol, e.to_string()),
        }
    }
    result
}

async fn fetch_and_append(job: &CaptureJob) -> Result<CaptureReport, CaptureError> {
    let book = job
        .fetcher
        .fetch_order_book(&job.symbol, job.depth_limit)
        .await?;
    let market_price = job.fetcher.fetch_market_price(&job.symbol).await?;

    let now = Local::now();
    let capture_time = now.timestamp();
    let local_time = now.format(LOCAL_TIME_FORMAT).to_string();

    let to_records = |side: Side, levels: &[PriceLevel]| -> Vec<SnapshotRecord> {
        levels
            .iter()
            .map(|level| SnapshotRecord {
                capture_time,
                local_time: local_time.clone(),
                price: level.price,
                volume: level.volume,
                market_price,
                side,
            })
            .collect()
    };

    let bids = to_records(Side::Bid, &book.bids);
    let asks = to_records(Side::Ask, &book.asks);

    job.store.append(&job.symbol, Side::Bid, &bids)?;
    job.store.append(&job.symbol, Side::Ask, &asks)?;

    Ok(CaptureReport {
        symbol: job.symbol.clone(),
        capture_time,
        local_time,
        market_price,
        bid_levels: bids.len(),
        ask_levels: asks.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
