pub mod orderbook;

pub use orderbook::{DepthBook, PriceLevel};

use async_trait::async_trait;

use crate::error::FetchError;

/// Source of order-book snapshots. Implemented by the REST client; tests
/// substitute in-memory doubles.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Top `depth` levels per side for `symbol`.
    async fn fetch_order_book(&self, symbol: &str, depth: u32) -> Result<DepthBook, FetchError>;

    /// Last traded price for `symbol`.
    async fn fetch_market_price(&self, symbol: &str) -> Result<f64, FetchError>;
}
