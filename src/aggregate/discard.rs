use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Aggregator, SampleQueue, SampleSender};
use crate::error::Result;
use crate::sample;

/// Drops every sample straight back into the pool.
pub struct DiscardAggregator {
    queue: SampleQueue,
    discarded: AtomicU64,
}

impl DiscardAggregator {
    pub fn new(buffer: usize) -> Self {
        Self {
            queue: SampleQueue::new(buffer),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Aggregator for DiscardAggregator {
    fn sink(&self) -> SampleSender {
        self.queue.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut drain = self.queue.drain("discard aggregator", ctx)?;
        while let Some(s) = drain.next().await {
            sample::release(s);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
