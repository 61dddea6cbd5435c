// =============================================================================
// Analytics — read-side engines over the snapshot store
// =============================================================================
//
// Engines are pure functions over records. The report builders below load the
// logs they need and wrap engine output per side, so the HTTP layer can render
// a diagnostic for one side without failing the whole response.
// =============================================================================

pub mod bucket;
pub mod heatmap;
pub mod histogram;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::StoreError;
use crate::store::SnapshotStore;
use crate::types::Side;

pub use bucket::{PriceBucketPolicy, TimeGranularity};
pub use heatmap::{build_heatmap, Heatmap, HeatmapParams};
pub use histogram::{build_histogram, Histogram, HistogramParams};

/// Engine result: either a value or a valid-but-empty marker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ready(T),
    InsufficientData { reason: String },
}

impl<T> Outcome<T> {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Outcome::InsufficientData {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Heatmap report
// ---------------------------------------------------------------------------

/// Which logs a heatmap is built from.
#[derive(Debug, Clone)]
pub enum HeatmapSource {
    /// The `(symbol, side)` logs.
    Symbol(String),
    /// Every log of the side folder concatenated.
    Folder,
}

/// Per-side panel body: a grid, an empty marker, or a load failure.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PanelBody {
    Ready(Heatmap),
    InsufficientData { reason: String },
    Failed { kind: String, message: String },
}

#[derive(Debug, Serialize)]
pub struct HeatmapPanel {
    pub side: Side,
    #[serde(flatten)]
    pub body: PanelBody,
}

#[derive(Debug, Serialize)]
pub struct HeatmapReport {
    pub symbol: Option<String>,
    pub panels: Vec<HeatmapPanel>,
}

/// Build one heatmap panel per requested side. A missing or unreadable log
/// only fails its own panel.
pub fn heatmap_report(
    store: &SnapshotStore,
    source: &HeatmapSource,
    side: Option<Side>,
    params: &HeatmapParams,
) -> HeatmapReport {
    let sides: Vec<Side> = match side {
        Some(side) => vec![side],
        None => Side::ALL.to_vec(),
    };

    let panels = sides
        .into_iter()
        .map(|side| {
            let loaded = match source {
                HeatmapSource::Symbol(symbol) => store.load(symbol, side),
                HeatmapSource::Folder => store.load_all(side),
            };
            let body = match loaded {
                Ok(records) => match build_heatmap(&records, params) {
                    Outcome::Ready(h) => PanelBody::Ready(h),
                    Outcome::InsufficientData { reason } => PanelBody::InsufficientData { reason },
                },
                Err(e) => {
                    warn!(side = %side, error = %e, "heatmap panel unavailable");
                    PanelBody::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }
                }
            };
            HeatmapPanel { side, body }
        })
        .collect();

    HeatmapReport {
        symbol: match source {
            HeatmapSource::Symbol(symbol) => Some(symbol.to_uppercase()),
            HeatmapSource::Folder => None,
        },
        panels,
    }
}

// ---------------------------------------------------------------------------
// Histogram report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HistogramPanel {
    pub side: Side,
    #[serde(flatten)]
    pub outcome: Outcome<Histogram>,
}

#[derive(Debug, Serialize)]
pub struct HistogramReport {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub panels: Vec<HistogramPanel>,
}

/// Build histograms for `side` (or both, asks first). Store failures are
/// returned to the caller as typed errors.
pub fn histogram_report(
    store: &SnapshotStore,
    symbol: &str,
    side: Option<Side>,
    params: &HistogramParams,
    now: DateTime<Utc>,
) -> Result<HistogramReport, StoreError> {
    let sides: Vec<Side> = match side {
        Some(side) => vec![side],
        None => Side::ALL.to_vec(),
    };

    let mut panels = Vec::with_capacity(sides.len());
    for side in sides {
        let records = store.load(symbol, side)?;
        panels.push(HistogramPanel {
            side,
            outcome: build_histogram(&records, side, params, now),
        });
    }

    Ok(HistogramReport {
        symbol: symbol.to_uppercase(),
        generated_at: now,
        panels,
    })
}
