// =============================================================================
// Binance REST Client — public depth and last-price endpoints
// =============================================================================
//
// Every request carries the client-wide timeout so a stalled upstream can
// never park a capture task indefinitely. Transport failures map to
// `UpstreamUnavailable`; well-formed HTTP with a mangled body maps to
// `UpstreamProtocolError`.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::binance::rate_limit::{depth_weight, WeightTracker, TICKER_PRICE_WEIGHT};
use crate::error::FetchError;
use crate::market_data::orderbook::{parse_depth_response, parse_ticker_price};
use crate::market_data::{DepthBook, SnapshotFetcher};

/// Public-data REST client. Cheap to clone; the connection pool is shared.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    weights: std::sync::Arc<WeightTracker>,
}

impl BinanceClient {
    /// Build a client against `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "BinanceClient initialised");

        Ok(Self {
            base_url,
            client,
            weights: std::sync::Arc::new(WeightTracker::new()),
        })
    }

    /// GET `path` with `query`, returning the parsed JSON body.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
    ) -> Result<serde_json::Value, FetchError> {
        if !self.weights.can_send(weight) {
            return Err(FetchError::unavailable(format!(
                "GET {path} deferred: local request-weight ceiling reached"
            )));
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).query(query).send().await.map_err(|e| {
            FetchError::unavailable(format!("GET {path} request failed: {e}"))
        })?;

        self.weights.update_from_headers(resp.headers());

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            FetchError::unavailable(format!("GET {path} body read failed: {e}"))
        })?;

        if !status.is_success() {
            return Err(FetchError::unavailable(format!(
                "Binance GET {path} returned {status}: {text}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| FetchError::protocol(format!("GET {path} returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl SnapshotFetcher for BinanceClient {
    /// GET /api/v3/depth (public).
    #[instrument(skip(self), name = "binance::fetch_order_book")]
    async fn fetch_order_book(&self, symbol: &str, depth: u32) -> Result<DepthBook, FetchError> {
        let query = [
            ("symbol", symbol.to_uppercase()),
            ("limit", depth.to_string()),
        ];
        let body = self
            .get_json("/api/v3/depth", &query, depth_weight(depth))
            .await?;
        let book = parse_depth_response(&body)?;
        debug!(
            bids = book.bids.len(),
            asks = book.asks.len(),
            last_update_id = book.last_update_id,
            "depth fetched"
        );
        Ok(book)
    }

    /// GET /api/v3/ticker/price (public).
    #[instrument(skip(self), name = "binance::fetch_market_price")]
    async fn fetch_market_price(&self, symbol: &str) -> Result<f64, FetchError> {
        let query = [("symbol", symbol.to_uppercase())];
        let body = self
            .get_json("/api/v3/ticker/price", &query, TICKER_PRICE_WEIGHT)
            .await?;
        let price = parse_ticker_price(&body)?;
        debug!(price, "market price fetched");
        Ok(price)
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("weights", &self.weights)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BinanceClient::new("https://api.binance.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://api.binance.com");
        assert_eq!(client.weights.used_weight(), 0);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        // Port 9 on loopback (discard) is closed in test environments.
        let client = BinanceClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.fetch_order_book("btcusdt", 5).await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnavailable(_)));
        let err = client.fetch_market_price("btcusdt").await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnavailable(_)));
    }
}
