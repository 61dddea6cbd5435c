// =============================================================================
// Liquidity Histogram — windowed volume per price bucket, classified against
// the current market price
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::analytics::bucket::{bucket_index, bucket_label, PriceBucketPolicy};
use crate::analytics::Outcome;
use crate::types::{Side, SnapshotRecord};

#[derive(Debug, Clone, Copy)]
pub struct HistogramParams {
    /// Look-back window; 0 disables the filter.
    pub window_minutes: u32,
    /// Keep only the `top` highest-volume buckets; `None`/`0` keeps all.
    pub top: Option<usize>,
    pub price_policy: PriceBucketPolicy,
}

/// Position of a bucket relative to the bucket holding the market price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketClass {
    Current,
    Resistance,
    Support,
    Neutral,
}

impl BucketClass {
    fn classify(side: Side, bucket: i64, current: i64) -> Self {
        if bucket == current {
            Self::Current
        } else if side == Side::Ask && bucket > current {
            Self::Resistance
        } else if side == Side::Bid && bucket < current {
            Self::Support
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBar {
    /// Lower bound of `[price_bucket, upper_bound)`.
    pub price_bucket: f64,
    pub upper_bound: f64,
    pub volume: f64,
    pub class: BucketClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    pub side: Side,
    pub bucket_size: f64,
    pub current_price: f64,
    pub current_bucket: f64,
    /// Earliest capture inside the window.
    pub window_start: DateTime<Utc>,
    pub window_minutes: u32,
    /// Ascending by price bucket.
    pub bars: Vec<HistogramBar>,
    pub record_count: usize,
}

/// Build the histogram of `side` from `records` as seen at `now`.
pub fn build_histogram(
    records: &[SnapshotRecord],
    side: Side,
    params: &HistogramParams,
    now: DateTime<Utc>,
) -> Outcome<Histogram> {
    let cutoff = (params.window_minutes > 0)
        .then(|| (now - Duration::minutes(i64::from(params.window_minutes))).timestamp());

    let window: Vec<&SnapshotRecord> = records
        .iter()
        .filter(|r| r.price.is_finite() && r.volume.is_finite())
        .filter(|r| cutoff.map_or(true, |c| r.capture_time >= c))
        .collect();

    if window.is_empty() {
        return Outcome::insufficient(if params.window_minutes > 0 {
            format!("no {side} snapshots in the last {} minutes", params.window_minutes)
        } else {
            format!("no {side} snapshots recorded")
        });
    }

    // Most recent capture carrying a usable market price; later rows win ties.
    let Some(anchor) = window
        .iter()
        .filter(|r| r.market_price.is_finite() && r.market_price > 0.0)
        .fold(None::<&&SnapshotRecord>, |best, r| match best {
            Some(b) if b.capture_time > r.capture_time => Some(b),
            _ => Some(r),
        })
    else {
        return Outcome::insufficient(format!("no {side} snapshot carries a market price"));
    };

    let size = params.price_policy.resolve(window.iter().map(|r| r.price));
    let current = bucket_index(anchor.market_price, size);

    let mut volumes: BTreeMap<i64, f64> = BTreeMap::new();
    for record in &window {
        *volumes.entry(bucket_index(record.price, size)).or_insert(0.0) += record.volume;
    }

    let mut buckets: Vec<(i64, f64)> = volumes.into_iter().collect();
    if let Some(top) = params.top.filter(|n| *n > 0) {
        buckets.sort_by(|a, b| b.1.total_cmp(&a.1));
        buckets.truncate(top);
        buckets.sort_by_key(|(k, _)| *k);
    }

    let bars = buckets
        .into_iter()
        .map(|(k, volume)| HistogramBar {
            price_bucket: bucket_label(k, size),
            upper_bound: bucket_label(k + 1, size),
            volume,
            class: BucketClass::classify(side, k, current),
        })
        .collect();

    let window_start = window
        .iter()
        .map(|r| r.capture_time)
        .min()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .unwrap_or(now);

    Outcome::Ready(Histogram {
        side,
        bucket_size: size,
        current_price: anchor.market_price,
        current_bucket: bucket_label(current, size),
        window_start,
        window_minutes: params.window_minutes,
        bars,
        record_count: window.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(t: i64, price: f64, volume: f64, market_price: f64, side: Side) -> SnapshotRecord {
        SnapshotRecord {
            capture_time: t,
            local_time: String::new(),
            price,
            volume,
            market_price,
            side,
        }
    }

    fn params(window_minutes: u32, top: Option<usize>, size: f64) -> HistogramParams {
        HistogramParams {
            window_minutes,
            top,
            price_policy: PriceBucketPolicy::Fixed { width: size },
        }
    }

    fn ready(outcome: Outcome<Histogram>) -> Histogram {
        match outcome {
            Outcome::Ready(h) => h,
            Outcome::InsufficientData { reason } => panic!("unexpected insufficient data: {reason}"),
        }
    }

    fn epoch(t: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(t, 0).unwrap()
    }

    #[test]
    fn single_record_per_side_lands_in_its_bucket() {
        let bids = vec![rec(0, 100.0, 1.0, 100.0, Side::Bid)];
        let asks = vec![rec(0, 100.0, 2.0, 100.0, Side::Ask)];

        let bid = ready(build_histogram(&bids, Side::Bid, &params(0, None, 50.0), epoch(0)));
        let ask = ready(build_histogram(&asks, Side::Ask, &params(0, None, 50.0), epoch(0)));

        assert_eq!(bid.bars.len(), 1);
        assert_eq!(bid.bars[0].price_bucket, 100.0);
        assert_eq!(bid.bars[0].upper_bound, 150.0);
        assert_eq!(bid.bars[0].volume, 1.0);
        assert_eq!(ask.bars.len(), 1);
        assert_eq!(ask.bars[0].price_bucket, 100.0);
        assert_eq!(ask.bars[0].volume, 2.0);
    }

    #[test]
    fn ask_buckets_above_current_are_resistance() {
        let asks = vec![
            rec(0, 95.0, 1.0, 105.0, Side::Ask),
            rec(0, 105.0, 1.0, 105.0, Side::Ask),
            rec(0, 115.0, 1.0, 105.0, Side::Ask),
            rec(0, 135.0, 1.0, 105.0, Side::Ask),
        ];
        let h = ready(build_histogram(&asks, Side::Ask, &params(0, None, 10.0), epoch(0)));
        let classes: Vec<BucketClass> = h.bars.iter().map(|b| b.class).collect();
        assert_eq!(
            classes,
            vec![
                BucketClass::Neutral,
                BucketClass::Current,
                BucketClass::Resistance,
                BucketClass::Resistance
            ]
        );
        assert_eq!(h.current_bucket, 100.0);
    }

    #[test]
    fn bid_buckets_below_current_are_support() {
        let bids = vec![
            rec(0, 85.0, 1.0, 105.0, Side::Bid),
            rec(0, 101.0, 1.0, 105.0, Side::Bid),
            rec(0, 125.0, 1.0, 105.0, Side::Bid),
        ];
        let h = ready(build_histogram(&bids, Side::Bid, &params(0, None, 10.0), epoch(0)));
        let classes: Vec<BucketClass> = h.bars.iter().map(|b| b.class).collect();
        assert_eq!(
            classes,
            vec![BucketClass::Support, BucketClass::Current, BucketClass::Neutral]
        );
    }

    #[test]
    fn current_price_comes_from_latest_capture() {
        let bids = vec![
            rec(100, 90.0, 1.0, 95.0, Side::Bid),
            rec(200, 90.0, 1.0, 125.0, Side::Bid),
            rec(50, 90.0, 1.0, 70.0, Side::Bid),
        ];
        let h = ready(build_histogram(&bids, Side::Bid, &params(0, None, 10.0), epoch(300)));
        assert_eq!(h.current_price, 125.0);
        assert_eq!(h.current_bucket, 120.0);
        assert_eq!(h.window_start, epoch(50));
    }

    #[test]
    fn top_keeps_largest_then_sorts_by_price() {
        let asks = vec![
            rec(0, 100.0, 5.0, 100.0, Side::Ask),
            rec(0, 110.0, 1.0, 100.0, Side::Ask),
            rec(0, 120.0, 9.0, 100.0, Side::Ask),
            rec(0, 130.0, 3.0, 100.0, Side::Ask),
        ];
        let h = ready(build_histogram(&asks, Side::Ask, &params(0, Some(2), 10.0), epoch(0)));
        let buckets: Vec<f64> = h.bars.iter().map(|b| b.price_bucket).collect();
        assert_eq!(buckets, vec![100.0, 120.0]);
    }

    #[test]
    fn window_filters_old_records() {
        let now = epoch(10_000);
        let bids = vec![
            rec(10_000 - 3_601, 100.0, 7.0, 100.0, Side::Bid),
            rec(10_000 - 60, 100.0, 2.0, 100.0, Side::Bid),
        ];
        let h = ready(build_histogram(&bids, Side::Bid, &params(60, None, 10.0), now));
        assert_eq!(h.bars.len(), 1);
        assert_eq!(h.bars[0].volume, 2.0);
        assert_eq!(h.record_count, 1);
    }

    #[test]
    fn empty_window_is_insufficient_data() {
        let outcome = build_histogram(&[], Side::Bid, &params(60, None, 10.0), epoch(0));
        assert!(matches!(outcome, Outcome::InsufficientData { .. }));

        let stale = vec![rec(0, 100.0, 1.0, 100.0, Side::Ask)];
        let outcome = build_histogram(&stale, Side::Ask, &params(60, None, 10.0), epoch(7_200));
        assert!(matches!(outcome, Outcome::InsufficientData { .. }));
    }

    #[test]
    fn range_policy_derives_fifty_bands() {
        let asks = vec![
            rec(0, 100.0, 1.0, 100.0, Side::Ask),
            rec(0, 150.0, 1.0, 100.0, Side::Ask),
        ];
        let p = HistogramParams {
            window_minutes: 0,
            top: None,
            price_policy: PriceBucketPolicy::RangeBands { bands: 50 },
        };
        let h = ready(build_histogram(&asks, Side::Ask, &p, epoch(0)));
        assert!((h.bucket_size - 1.0).abs() < 1e-12);
        assert_eq!(h.bars.len(), 2);
    }
}
