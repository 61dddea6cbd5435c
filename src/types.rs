// =============================================================================
// Shared types used across the depth-heatmap service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of the order book a snapshot level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Both sides, asks first (the order panels are presented in).
    pub const ALL: [Side; 2] = [Side::Ask, Side::Bid];

    /// Directory name of this side's logs under the data root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Bid => "bids",
            Self::Ask => "asks",
        }
    }

    /// Parse a user-supplied side filter (`bid`, `bids`, `ASK`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bid" | "bids" | "buy" => Some(Self::Bid),
            "ask" | "asks" | "sell" => Some(Self::Ask),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "BID"),
            Self::Ask => write!(f, "ASK"),
        }
    }
}

/// Longest symbol accepted anywhere a symbol becomes a file name.
pub const MAX_SYMBOL_LEN: usize = 20;

/// Canonical (upper-case) form of `raw`, or `None` unless it is 1 to
/// [`MAX_SYMBOL_LEN`] ASCII letters and digits.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then_some(symbol)
}

/// One persisted depth level observed at one capture instant.
///
/// Records are immutable once written; `capture_time` is unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub capture_time: i64,
    pub local_time: String,
    pub price: f64,
    pub volume: f64,
    pub market_price: f64,
    pub side: Side,
}

/// Global scheduler state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Active,
    Inactive,
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}
