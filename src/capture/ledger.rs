// =============================================================================
// Capture Ledger — last outcome of every symbol's capture cycle
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

/// Per-symbol capture health, surfaced through the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolCaptureInfo {
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u32,
    /// Unix seconds of the last successful capture.
    pub last_capture_time: Option<i64>,
    pub last_market_price: Option<f64>,
    pub last_error: Option<String>,
    /// RFC 3339 time the last error was recorded.
    pub last_error_at: Option<String>,
}

/// Thread-safe map of [`SymbolCaptureInfo`] keyed by symbol.
#[derive(Debug, Default)]
pub struct CaptureLedger {
    entries: RwLock<HashMap<String, SymbolCaptureInfo>>,
}

impl CaptureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, symbol: &str, capture_time: i64, market_price: f64) {
        let mut entries = self.entries.write();
        let info = entries.entry(symbol.to_string()).or_default();
        info.cycles_ok += 1;
        info.consecutive_failures = 0;
        info.last_capture_time = Some(capture_time);
        info.last_market_price = Some(market_price);
    }

    pub fn record_failure(&self, symbol: &str, error: String) {
        let mut entries = self.entries.write();
        let info = entries.entry(symbol.to_string()).or_default();
        info.cycles_failed += 1;
        info.consecutive_failures = info.consecutive_failures.saturating_add(1);
        info.last_error = Some(error);
        info.last_error_at = Some(Utc::now().to_rfc3339());
    }

    #[cfg(test)]
    pub fn get(&self, symbol: &str) -> Option<SymbolCaptureInfo> {
        self.entries.read().get(symbol).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, SymbolCaptureInfo> {
        self.entries.read().clone()
    }
}
