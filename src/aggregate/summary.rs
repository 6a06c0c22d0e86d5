use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::percentiles::{timing_histogram, PercentileSet};
use super::{Aggregator, SampleQueue, SampleSender};
use crate::error::Result;
use crate::sample::{self, Field, Sample};

/// Folds samples into histograms and counters instead of writing them out.
/// The final snapshot is logged when the run ends and stays readable
/// through [`SummaryAggregator::snapshot`].
pub struct SummaryAggregator {
    queue: SampleQueue,
    inner: Mutex<Inner>,
}

/// Read-only view of everything recorded so far.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub rtt: PercentileSet,
    pub latency: PercentileSet,

    pub total_samples: u64,
    pub total_errors: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub samples_per_sec: f64,
    pub elapsed_secs: f64,

    /// Sample counts keyed by protocol code.
    pub codes: BTreeMap<i64, u64>,
    /// Sample counts keyed by errno, errors only.
    pub errnos: BTreeMap<i64, u64>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    rtt_hist: Histogram<u64>,
    latency_hist: Histogram<u64>,

    total_samples: u64,
    total_errors: u64,
    bytes_out: u64,
    bytes_in: u64,
    codes: BTreeMap<i64, u64>,
    errnos: BTreeMap<i64, u64>,

    // Anchored on the first sample
    start_time: Option<Instant>,
}

impl SummaryAggregator {
    pub fn new(buffer: usize) -> Self {
        Self {
            queue: SampleQueue::new(buffer),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn snapshot(&self) -> Summary {
        self.inner.lock().snapshot()
    }
}

#[async_trait]
impl Aggregator for SummaryAggregator {
    fn sink(&self) -> SampleSender {
        self.queue.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut drain = self.queue.drain("summary aggregator", ctx)?;
        while let Some(s) = drain.next().await {
            self.inner.lock().record(&s);
            sample::release(s);
        }

        let summary = self.snapshot();
        info!(
            samples = summary.total_samples,
            errors = summary.total_errors,
            per_sec = summary.samples_per_sec,
            rtt = %summary.rtt,
            latency = %summary.latency,
            codes = ?summary.codes,
            "shoot summary"
        );
        Ok(())
    }
}

impl Inner {
    fn new() -> Self {
        Self {
            rtt_hist: timing_histogram(),
            latency_hist: timing_histogram(),
            total_samples: 0,
            total_errors: 0,
            bytes_out: 0,
            bytes_in: 0,
            codes: BTreeMap::new(),
            errnos: BTreeMap::new(),
            start_time: None,
        }
    }

    fn record(&mut self, s: &Sample) {
        self.start_time.get_or_insert_with(Instant::now);
        self.total_samples += 1;

        // ── Histograms (clamp to ≥ 1 μs) ───────────────────────
        let _ = self.rtt_hist.record(to_u64(s.rtt()).max(1));
        let latency = to_u64(s.get(Field::Latency));
        if latency > 0 {
            let _ = self.latency_hist.record(latency);
        }

        // ── Counters ────────────────────────────────────────────
        self.bytes_out += to_u64(s.get(Field::RequestBytes));
        self.bytes_in += to_u64(s.get(Field::ResponseBytes));
        if s.err().is_some() {
            self.total_errors += 1;
            *self.errnos.entry(s.errno()).or_default() += 1;
        } else {
            *self.codes.entry(s.proto_code()).or_default() += 1;
        }
    }

    fn snapshot(&self) -> Summary {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let samples_per_sec = if elapsed_secs > 0.0 {
            self.total_samples as f64 / elapsed_secs
        } else {
            0.0
        };

        Summary {
            rtt: PercentileSet::from_histogram(&self.rtt_hist),
            latency: PercentileSet::from_histogram(&self.latency_hist),
            total_samples: self.total_samples,
            total_errors: self.total_errors,
            bytes_out: self.bytes_out,
            bytes_in: self.bytes_in,
            samples_per_sec,
            elapsed_secs,
            codes: self.codes.clone(),
            errnos: self.errnos.clone(),
        }
    }
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}
