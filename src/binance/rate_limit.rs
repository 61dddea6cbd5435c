// =============================================================================
// Request-Weight Tracker — keeps the capture loop below Binance's 1m budget
// =============================================================================
//
// Binance charges every REST call a request weight and reports the weight used
// in the current minute through the `X-MBX-USED-WEIGHT-1M` response header.
// The tracker mirrors that header in atomics and refuses locally once a call
// would cross our own ceiling. The mirrored value is forgotten when the wall
// clock minute rolls over, since the exchange resets its counter there too.
// =============================================================================

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// Ceiling at which we refuse to send additional requests (exchange cap is 6000).
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Weight of `GET /api/v3/ticker/price` for a single symbol.
pub const TICKER_PRICE_WEIGHT: u32 = 2;

/// Weight of `GET /api/v3/depth` for the given `limit`.
pub fn depth_weight(limit: u32) -> u32 {
    match limit {
        0..=100 => 5,
        101..=500 => 25,
        501..=1000 => 50,
        _ => 250,
    }
}

fn current_minute() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 60
}

/// Lock-free mirror of the exchange-reported request weight.
pub struct WeightTracker {
    used_weight_1m: AtomicU32,
    minute: AtomicU64,
}

impl WeightTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            minute: AtomicU64::new(current_minute()),
        }
    }

    /// Refresh from the headers of any REST response.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        self.record(weight, current_minute());
    }

    fn record(&self, weight: u32, minute: u64) {
        self.minute.store(minute, Ordering::Relaxed);
        let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "request weight updated from header");
    }

    /// `true` if `weight` more can be spent without crossing the ceiling.
    pub fn can_send(&self, weight: u32) -> bool {
        self.can_send_at(weight, current_minute())
    }

    fn can_send_at(&self, weight: u32, minute: u64) -> bool {
        if self.minute.load(Ordering::Relaxed) != minute {
            self.used_weight_1m.store(0, Ordering::Relaxed);
            self.minute.store(minute, Ordering::Relaxed);
        }
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked, would exceed weight ceiling"
            );
        }
        allowed
    }

    pub fn used_weight(&self) -> u32 {
        self.used_weight_1m.load(Ordering::Relaxed)
    }
}

impl Default for WeightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeightTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightTracker")
            .field("used_weight_1m", &self.used_weight())
            .finish()
    }
}
