#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use barrage::aggregate::{Aggregator, SampleQueue, SampleSender};
use barrage::error::Result;
use barrage::sample::{self, Field};

/// What the tests look at in a sample.
#[derive(Debug, Clone)]
pub struct Seen {
    pub tag: String,
    pub rtt: i64,
    pub code: i64,
    pub errno: i64,
    pub request_bytes: i64,
    pub response_bytes: i64,
}

/// Aggregator keeping every sample it drains.
pub struct Collect {
    queue: SampleQueue,
    seen: Mutex<Vec<Seen>>,
}

impl Collect {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: SampleQueue::new(64),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Aggregator for Collect {
    fn sink(&self) -> SampleSender {
        self.queue.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut drain = self.queue.drain("collect", ctx)?;
        while let Some(s) = drain.next().await {
            self.seen.lock().push(Seen {
                tag: s.tag().to_owned(),
                rtt: s.rtt(),
                code: s.proto_code(),
                errno: s.errno(),
                request_bytes: s.get(Field::RequestBytes),
                response_bytes: s.get(Field::ResponseBytes),
            });
            sample::release(s);
        }
        Ok(())
    }
}
