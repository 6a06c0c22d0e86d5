use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Aggregator, SampleQueue, SampleSender};
use crate::error::{Error, Result};
use crate::sample::{self, codec};

/// Writes samples in the phout trace format to a file, or to stdout when
/// the destination is empty.
///
/// The file is opened append-only, created if absent, with synchronous
/// writes. Write failures are logged and counted; they never stop the run.
pub struct PhoutAggregator {
    destination: String,
    queue: SampleQueue,
    written: AtomicU64,
    write_errors: AtomicU64,
}

impl PhoutAggregator {
    pub fn new(destination: impl Into<String>, buffer: usize) -> Self {
        Self {
            destination: destination.into(),
            queue: SampleQueue::new(buffer),
            written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    async fn open(&self) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        if self.destination.is_empty() {
            return Ok(Box::new(tokio::io::stdout()));
        }
        let mut opts = tokio::fs::OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        opts.custom_flags(libc::O_SYNC);
        let file = opts.open(&self.destination).await.map_err(|source| Error::Output {
            path: self.destination.clone(),
            source,
        })?;
        Ok(Box::new(file))
    }

    fn record_error(&self, err: std::io::Error) {
        let total = self.write_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(destination = %self.destination, error = %err, total, "phout write failed");
    }
}

#[async_trait]
impl Aggregator for PhoutAggregator {
    fn sink(&self) -> SampleSender {
        self.queue.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut drain = self.queue.drain("phout aggregator", ctx)?;
        let mut out = BufWriter::new(self.open().await?);
        let mut line = Vec::with_capacity(256);

        while let Some(sample) = drain.next().await {
            line.clear();
            let res = match codec::encode(&sample, &mut line) {
                Ok(()) => out.write_all(&line).await,
                Err(err) => Err(err),
            };
            sample::release(sample);
            match res {
                Ok(()) => {
                    self.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => self.record_error(err),
            }

            // Flush whenever the sink runs dry so the trace never lags far
            // behind the shoot.
            if drain.is_idle() {
                if let Err(err) = out.flush().await {
                    self.record_error(err);
                }
            }
        }

        if let Err(err) = out.flush().await {
            self.record_error(err);
        }
        debug!(
            destination = %self.destination,
            written = self.written(),
            errors = self.write_errors(),
            "phout aggregator finished"
        );
        Ok(())
    }
}
