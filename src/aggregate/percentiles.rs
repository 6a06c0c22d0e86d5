use std::fmt;

use hdrhistogram::Histogram;
use serde::Serialize;

/// HdrHistogram range for shot timings: 1 μs → 10 min, 3 significant figures.
pub const HIST_LOW: u64 = 1;
pub const HIST_HIGH: u64 = 600_000_000;
pub const HIST_SIGFIG: u8 = 3;

/// Builds an empty histogram with the shot-timing bounds.
pub fn timing_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("static histogram bounds are valid")
}

/// Percentile breakdown of one timing slot, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Zeroed when the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p999: hist.value_at_quantile(0.999),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p95: 0,
            p99: 0,
            p999: 0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

impl fmt::Display for PercentileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={}μs p50={}μs p95={}μs p99={}μs p99.9={}μs max={}μs mean={:.1}μs",
            self.count, self.min, self.p50, self.p95, self.p99, self.p999, self.max, self.mean
        )
    }
}
