//! Aggregators drain samples pushed by guns and write them somewhere.
//!
//! Every aggregator owns a bounded sink. Guns hold clones of the write end
//! and block when it is full, so a slow aggregator slows the shoot down
//! instead of losing samples. `run` drains until its context is cancelled,
//! then empties whatever is still queued without waiting, and returns.

pub mod discard;
pub mod log;
pub mod percentiles;
pub mod phout;
pub mod shared;
pub mod summary;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::sample::Sample;

pub use discard::DiscardAggregator;
pub use log::LogAggregator;
pub use phout::PhoutAggregator;
pub use shared::{AggregatorRegistry, SharedAggregator};
pub use summary::{Summary, SummaryAggregator};

/// Default sink depth.
pub const DEFAULT_SINK_BUFFER: usize = 1024;

/// Write end of an aggregator sink, cloned into every gun.
pub type SampleSender = mpsc::Sender<Box<Sample>>;

#[async_trait]
pub trait Aggregator: Send + Sync {
    fn sink(&self) -> SampleSender;

    async fn run(&self, ctx: CancellationToken) -> Result<()>;
}

// ─── Sink queue ──────────────────────────────────────────────────

/// The channel behind an aggregator. The read end can be taken once.
pub struct SampleQueue {
    tx: SampleSender,
    rx: Mutex<Option<mpsc::Receiver<Box<Sample>>>>,
}

impl SampleQueue {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn sink(&self) -> SampleSender {
        self.tx.clone()
    }

    /// Starts draining; fails if the queue is already being drained.
    pub fn drain(&self, who: &'static str, ctx: CancellationToken) -> Result<Drain> {
        let rx = self.rx.lock().take().ok_or(Error::AlreadyRunning(who))?;
        Ok(Drain {
            rx,
            ctx,
            draining: false,
        })
    }
}

/// Yields samples until cancellation, then the leftovers, then `None`.
pub struct Drain {
    rx: mpsc::Receiver<Box<Sample>>,
    ctx: CancellationToken,
    draining: bool,
}

impl Drain {
    pub async fn next(&mut self) -> Option<Box<Sample>> {
        if !self.draining {
            tokio::select! {
                biased;
                _ = self.ctx.cancelled() => self.draining = true,
                sample = self.rx.recv() => return sample,
            }
        }
        self.rx.try_recv().ok()
    }

    /// True when nothing is queued right now.
    pub fn is_idle(&self) -> bool {
        self.rx.is_empty()
    }
}
