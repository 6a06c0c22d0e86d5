use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Aggregator, PhoutAggregator, SampleSender};
use crate::error::{Error, Result};

/// Maps result destinations to the one aggregator writing there.
///
/// Owned by the engine and filled while pools are wired; every pool that
/// names the same destination gets a handle to the same aggregator, so all
/// of their users serialize through one sink. Not touched once users run.
#[derive(Default)]
pub struct AggregatorRegistry {
    by_destination: Mutex<HashMap<String, Arc<SharedAggregator>>>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phout aggregator for `destination`, created on first request.
    pub fn phout(&self, destination: &str, buffer: usize) -> Arc<SharedAggregator> {
        self.get_or_insert_with(destination, || {
            let phout: Arc<dyn Aggregator> = Arc::new(PhoutAggregator::new(destination, buffer));
            phout
        })
    }

    /// Registers one more holder of the aggregator keyed by `key`.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> Arc<SharedAggregator>
    where
        F: FnOnce() -> Arc<dyn Aggregator>,
    {
        let mut map = self.by_destination.lock();
        let shared = map
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(SharedAggregator::new(make())))
            .clone();
        shared.state.lock().holders += 1;
        shared
    }

    pub fn len(&self) -> usize {
        self.by_destination.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Shared handle ───────────────────────────────────────────────

/// Drives one aggregator on behalf of several holders.
///
/// The first `run` starts the inner aggregator under a private context.
/// Each `run` returns after its own context is cancelled and the inner
/// aggregator has finished; the inner context is cancelled only when the
/// last holder is done, so no holder's samples hit a closed sink.
pub struct SharedAggregator {
    inner: Arc<dyn Aggregator>,
    state: Arc<Mutex<SharedState>>,
}

struct SharedState {
    holders: usize,
    stop: CancellationToken,
    done: Option<watch::Receiver<bool>>,
    failure: Option<Error>,
    failure_text: Option<String>,
}

impl SharedAggregator {
    fn new(inner: Arc<dyn Aggregator>) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(SharedState {
                holders: 0,
                stop: CancellationToken::new(),
                done: None,
                failure: None,
                failure_text: None,
            })),
        }
    }

    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }

    fn start(&self) -> watch::Receiver<bool> {
        let mut st = self.state.lock();
        if let Some(done) = &st.done {
            return done.clone();
        }
        let (tx, rx) = watch::channel(false);
        let inner = self.inner.clone();
        let stop = st.stop.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.run(stop).await {
                let mut st = state.lock();
                st.failure_text = Some(err.to_string());
                st.failure = Some(err);
            }
            let _ = tx.send(true);
        });
        st.done = Some(rx.clone());
        rx
    }

    fn leave(&self) {
        let mut st = self.state.lock();
        st.holders = st.holders.saturating_sub(1);
        if st.holders == 0 {
            debug!("last holder left, stopping shared aggregator");
            st.stop.cancel();
        }
    }
}

#[async_trait]
impl Aggregator for SharedAggregator {
    fn sink(&self) -> SampleSender {
        self.inner.sink()
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut done = self.start();

        // An early inner failure ends every holder's run right away.
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = done.wait_for(|finished| *finished) => {}
        }
        self.leave();
        let _ = done.wait_for(|finished| *finished).await;

        let mut st = self.state.lock();
        if let Some(err) = st.failure.take() {
            return Err(err);
        }
        match &st.failure_text {
            Some(text) => Err(Error::SharedAggregator(text.clone())),
            None => Ok(()),
        }
    }
}
