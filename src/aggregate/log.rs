use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Aggregator, SampleQueue, SampleSender};
use crate::error::Result;
use crate::sample::{self, Field, Sample};

/// Logs one human-readable line per sample.
pub struct LogAggregator {
    queue: SampleQueue,
    logged: AtomicU64,
}

impl LogAggregator {
    pub fn new(buffer: usize) -> Self {
        Self {
            queue: SampleQueue::new(buffer),
            logged: AtomicU64::new(0),
        }
    }

    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Aggregator for LogAggregator {
    fn sink(&self) -> SampleSender {
        self.queue.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut drain = self.queue.drain("log aggregator", ctx)?;
        while let Some(s) = drain.next().await {
            log_sample(&s);
            sample::release(s);
            self.logged.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

fn log_sample(s: &Sample) {
    match s.err() {
        Some(err) => info!(
            target: "barrage::sample",
            ts = %s.timestamp().format("%H:%M:%S%.3f"),
            tag = s.tag(),
            rtt_us = s.rtt(),
            errno = s.get(Field::Errno),
            error = %err,
            "shot failed"
        ),
        None => info!(
            target: "barrage::sample",
            ts = %s.timestamp().format("%H:%M:%S%.3f"),
            tag = s.tag(),
            rtt_us = s.rtt(),
            latency_us = s.get(Field::Latency),
            code = s.proto_code(),
            bytes_in = s.get(Field::ResponseBytes),
            "shot"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_and_releases_every_sample() {
        let agg = LogAggregator::new(8);
        let sink = agg.sink();
        let ctx = CancellationToken::new();
        let run = {
            let ctx = ctx.clone();
            async move { agg.run(ctx).await.map(|()| agg.logged()) }
        };
        let feed = async move {
            for i in 0..5 {
                let mut s = sample::acquire("REQUEST");
                if i % 2 == 0 {
                    s.set_proto_code(200);
                } else {
                    s.set_err("refused");
                }
                sink.send(s).await.unwrap();
            }
            ctx.cancel();
        };
        let (logged, ()) = tokio::join!(run, feed);
        assert_eq!(logged.unwrap(), 5);
    }
}
