// =============================================================================
// Bucketing primitives — price-bucket policies and time granularity
// =============================================================================
//
// A price bucket is the half-open interval [k*B, (k+1)*B). Buckets are keyed
// by their integer index k so that equality and ordering never depend on
// floating-point label comparisons.
//
// Two width policies are exposed and chosen explicitly by the caller:
//   Fixed(B)        use B as-is
//   RangeBands(n)   B = (max_price - min_price) / n
// Both are floored at MIN_BUCKET_WIDTH so a collapsed price range still
// yields a usable (single) bucket.
// =============================================================================

use serde::Serialize;

/// Smallest bucket width ever used.
pub const MIN_BUCKET_WIDTH: f64 = 1e-8;

/// Band count used by the heatmap when no width is supplied.
pub const HEATMAP_BANDS: u32 = 30;

/// Band count used by the histogram when no size is supplied.
pub const HISTOGRAM_BANDS: u32 = 50;

/// How the price-bucket width is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PriceBucketPolicy {
    Fixed { width: f64 },
    RangeBands { bands: u32 },
}

impl PriceBucketPolicy {
    /// Fixed width when `width` is given, otherwise range bands.
    pub fn from_request(width: Option<f64>, bands: u32) -> Self {
        match width {
            Some(width) => Self::Fixed { width },
            None => Self::RangeBands { bands },
        }
    }

    /// Resolve the concrete width for the observed `prices`.
    pub fn resolve<I>(&self, prices: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        let width = match *self {
            Self::Fixed { width } => width,
            Self::RangeBands { bands } => {
                let (min, max) = prices
                    .into_iter()
                    .filter(|p| p.is_finite())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                        (lo.min(p), hi.max(p))
                    });
                if min > max {
                    MIN_BUCKET_WIDTH
                } else {
                    (max - min) / f64::from(bands.max(1))
                }
            }
        };

        if width.is_finite() {
            width.max(MIN_BUCKET_WIDTH)
        } else {
            MIN_BUCKET_WIDTH
        }
    }
}

/// Index `k` of the bucket `[k*width, (k+1)*width)` holding `value`.
///
/// The quotient is only a first guess; it is corrected against the bucket
/// bounds themselves so rounding in `value / width` never moves a price
/// across an edge.
pub fn bucket_index(value: f64, width: f64) -> i64 {
    let k = (value / width).floor() as i64;
    if bucket_label(k + 1, width) <= value {
        k + 1
    } else if bucket_label(k, width) > value {
        k - 1
    } else {
        k
    }
}

/// Lower bound of bucket `index`.
pub fn bucket_label(index: i64, width: f64) -> f64 {
    index as f64 * width
}

/// Time-bucket granularity in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeGranularity {
    seconds: i64,
}

impl TimeGranularity {
    pub fn from_seconds(seconds: i64) -> Option<Self> {
        (seconds > 0).then_some(Self { seconds })
    }

    /// Parse pandas-style frequency strings: `30s`, `5min`, `5T`, `1h`, `1d`.
    /// A missing multiplier means 1 (`min` == `1min`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, unit) = raw.split_at(split);

        let count: i64 = if digits.is_empty() {
            1
        } else {
            digits.parse().ok()?
        };

        let unit_seconds = match unit.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" => 1,
            "t" | "m" | "min" | "mins" => 60,
            "h" | "hr" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            _ => return None,
        };

        Self::from_seconds(count.checked_mul(unit_seconds)?)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Floor a unix-seconds timestamp to this granularity.
    pub fn floor(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.seconds) * self.seconds
    }
}

impl Default for TimeGranularity {
    fn default() -> Self {
        Self { seconds: 300 }
    }
}
