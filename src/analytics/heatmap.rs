// =============================================================================
// Heatmap — price x time liquidity grid
// =============================================================================
//
// 1. Resolve the price-bucket width from the policy.
// 2. Key every record by (price bucket, time bucket).
// 3. Axes are the sorted union of observed buckets (price and time ascending).
// 4. Sum volume per cell and densify onto the full cross-product; empty cells
//    are explicit zeros.
// 5. Min-max normalise with a 0.001 guard in the denominator.
// 6. Build a market-price trace per time bucket, snapped onto the price axis.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics::bucket::{bucket_index, bucket_label, PriceBucketPolicy, TimeGranularity};
use crate::analytics::Outcome;
use crate::types::SnapshotRecord;

/// Added to the normalisation denominator so flat grids do not divide by zero.
const NORMALISE_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, Copy)]
pub struct HeatmapParams {
    pub price_policy: PriceBucketPolicy,
    pub granularity: TimeGranularity,
}

/// Dense heatmap. Rows follow `price_labels`, columns follow `time_labels`.
#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
    pub bucket_width: f64,
    pub time_bucket_seconds: i64,
    pub price_labels: Vec<f64>,
    pub time_labels: Vec<DateTime<Utc>>,
    pub volume_grid: Vec<Vec<f64>>,
    pub normalized_grid: Vec<Vec<f64>>,
    /// Market price per time bucket, snapped to a price label.
    pub market_trace: Vec<Option<f64>>,
    pub record_count: usize,
}

#[cfg(test)]
impl Heatmap {
    pub fn cell_count(&self) -> usize {
        self.volume_grid.iter().map(Vec::len).sum()
    }
}

/// Aggregate `records` into a heatmap.
pub fn build_heatmap(records: &[SnapshotRecord], params: &HeatmapParams) -> Outcome<Heatmap> {
    let usable: Vec<&SnapshotRecord> = records
        .iter()
        .filter(|r| r.price.is_finite() && r.volume.is_finite())
        .collect();

    if usable.is_empty() {
        return Outcome::insufficient("no usable snapshot records");
    }

    let width = params.price_policy.resolve(usable.iter().map(|r| r.price));
    let granularity = params.granularity;

    let mut price_axis: BTreeSet<i64> = BTreeSet::new();
    let mut time_axis: BTreeSet<i64> = BTreeSet::new();
    let mut sums: HashMap<(i64, i64), f64> = HashMap::new();

    for record in &usable {
        let p = bucket_index(record.price, width);
        let t = granularity.floor(record.capture_time);
        price_axis.insert(p);
        time_axis.insert(t);
        *sums.entry((p, t)).or_insert(0.0) += record.volume;
    }

    let price_keys: Vec<i64> = price_axis.into_iter().collect();
    let time_keys: Vec<i64> = time_axis.into_iter().collect();

    let volume_grid: Vec<Vec<f64>> = price_keys
        .iter()
        .map(|p| {
            time_keys
                .iter()
                .map(|t| sums.get(&(*p, *t)).copied().unwrap_or(0.0))
                .collect()
        })
        .collect();

    let normalized_grid = normalize(&volume_grid);
    let market_trace = market_trace(&usable, &time_keys, &price_keys, width, granularity);

    Outcome::Ready(Heatmap {
        bucket_width: width,
        time_bucket_seconds: granularity.seconds(),
        price_labels: price_keys.iter().map(|k| bucket_label(*k, width)).collect(),
        time_labels: time_keys
            .iter()
            .map(|t| DateTime::<Utc>::from_timestamp(*t, 0).unwrap_or_default())
            .collect(),
        volume_grid,
        normalized_grid,
        market_trace,
        record_count: usable.len(),
    })
}

/// `(z - min) / (max - min + 0.001)`, with NaN -> 0, +inf -> 1, -inf -> 0.
pub fn normalize(grid: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let (min, max) = grid
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });

    grid.iter()
        .map(|row| {
            row.iter()
                .map(|v| coerce((v - min) / (max - min + NORMALISE_EPSILON)))
                .collect()
        })
        .collect()
}

fn coerce(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else if v == f64::INFINITY {
        1.0
    } else if v == f64::NEG_INFINITY {
        0.0
    } else {
        v
    }
}

/// Mean market price per time bucket, nearest-neighbour filled, then snapped
/// onto the price axis.
fn market_trace(
    records: &[&SnapshotRecord],
    time_keys: &[i64],
    price_keys: &[i64],
    width: f64,
    granularity: TimeGranularity,
) -> Vec<Option<f64>> {
    let mut per_bucket: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for record in records {
        if record.market_price.is_finite() && record.market_price > 0.0 {
            let slot = per_bucket
                .entry(granularity.floor(record.capture_time))
                .or_insert((0.0, 0));
            slot.0 += record.market_price;
            slot.1 += 1;
        }
    }

    let means: Vec<Option<f64>> = time_keys
        .iter()
        .map(|t| per_bucket.get(t).map(|(sum, n)| sum / f64::from(*n)))
        .collect();

    fill_nearest(&means)
        .into_iter()
        .map(|price| price.map(|p| snap_to_label(p, price_keys, width)))
        .collect()
}

/// Replace each gap with the closest observed value (earlier wins ties).
fn fill_nearest(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let observed: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.or_else(|| {
                observed
                    .iter()
                    .min_by_key(|j| (j.abs_diff(i), **j))
                    .and_then(|j| values[*j])
            })
        })
        .collect()
}

/// Label of the bucket holding `price`; clamped to the nearest existing label
/// when that bucket is not on the axis.
fn snap_to_label(price: f64, price_keys: &[i64], width: f64) -> f64 {
    let target = bucket_index(price, width);
    let nearest = match price_keys.binary_search(&target) {
        Ok(i) => price_keys[i],
        Err(i) => {
            let below = i.checked_sub(1).map(|j| price_keys[j]);
            let above = price_keys.get(i).copied();
            match (below, above) {
                (Some(b), Some(a)) => {
                    if target - b <= a - target {
                        b
                    } else {
                        a
                    }
                }
                (Some(b), None) => b,
                (None, Some(a)) => a,
                (None, None) => target,
            }
        }
    };
    bucket_label(nearest, width)
}
