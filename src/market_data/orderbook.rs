// =============================================================================
// Depth book — normalised order-book snapshot and REST payload parsing
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// One `(price, volume)` level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: f64,
}

/// Normalised depth snapshot: bids best-first (descending), asks best-first
/// (ascending), exactly as the exchange orders them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthBook {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Parse a Binance REST depth response.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
pub fn parse_depth_response(root: &serde_json::Value) -> Result<DepthBook, FetchError> {
    let last_update_id = root["lastUpdateId"].as_u64().unwrap_or(0);

    let bids = root["bids"]
        .as_array()
        .ok_or_else(|| FetchError::protocol("depth response missing field bids"))?;

    let asks = root["asks"]
        .as_array()
        .ok_or_else(|| FetchError::protocol("depth response missing field asks"))?;

    Ok(DepthBook {
        last_update_id,
        bids: parse_levels(bids, "bids")?,
        asks: parse_levels(asks, "asks")?,
    })
}

/// Parse a Binance ticker-price response: `{"symbol": "BTCUSDT", "price": "37000.10"}`.
pub fn parse_ticker_price(root: &serde_json::Value) -> Result<f64, FetchError> {
    let price = parse_decimal(&root["price"])
        .ok_or_else(|| FetchError::protocol("ticker response missing field price"))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(FetchError::protocol(format!(
            "ticker price {price} is not a positive number"
        )));
    }
    Ok(price)
}

fn parse_levels(raw: &[serde_json::Value], field: &str) -> Result<Vec<PriceLevel>, FetchError> {
    raw.iter()
        .enumerate()
        .map(|(i, entry)| {
            let price = entry.get(0).and_then(parse_decimal);
            let volume = entry.get(1).and_then(parse_decimal);
            match (price, volume) {
                (Some(price), Some(volume)) => Ok(PriceLevel { price, volume }),
                _ => Err(FetchError::protocol(format!(
                    "malformed {field} level at index {i}: {entry}"
                ))),
            }
        })
        .collect()
}

/// Binance encodes decimals as strings; accept plain numbers too.
fn parse_decimal(val: &serde_json::Value) -> Option<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().ok()
    } else {
        val.as_f64()
    }
}
