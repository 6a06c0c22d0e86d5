//! Schedules: rate shapers emitting ticks, each tick being permission to
//! fire exactly one shot.
//!
//! A schedule is consumed by `run`, which pushes ticks into the sender it
//! is given and returns on exhaustion, cancellation, or once every
//! receiver is gone. The sender is dropped on return, which is the one and
//! only close of the tick channel.

pub mod batch;
pub mod composite;
pub mod linear;
pub mod periodic;
pub mod size;
pub mod unlimited;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use batch::Batch;
pub use composite::Composite;
pub use linear::Linear;
pub use periodic::{periodic, Periodic};
pub use size::Size;
pub use unlimited::Unlimited;

/// Ticks a schedule may run ahead of its consumers.
pub const TICK_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

pub type TickSender = kanal::AsyncSender<Tick>;
pub type TickReceiver = kanal::AsyncReceiver<Tick>;

#[async_trait]
pub trait Schedule: Send {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()>;
}

/// Spawns `schedule` on a fresh tick channel and returns its read end.
pub fn start(
    schedule: Box<dyn Schedule>,
    ctx: CancellationToken,
) -> (TickReceiver, JoinHandle<Result<()>>) {
    let (tx, rx) = kanal::bounded_async(TICK_BUFFER);
    let task = tokio::spawn(schedule.run(ctx, tx));
    (rx, task)
}

/// Sends one tick unless cancelled first. `false` means stop emitting.
pub(crate) async fn emit(out: &TickSender, ctx: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => false,
        sent = out.send(Tick) => sent.is_ok(),
    }
}

// ─── Relay ───────────────────────────────────────────────────────

/// An inner schedule running in its own task behind a rendezvous channel,
/// so the wrapper sees each tick at the moment the inner one emits it.
pub(crate) struct Relay {
    rx: TickReceiver,
    stop: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl Relay {
    pub(crate) fn spawn(inner: Box<dyn Schedule>, ctx: &CancellationToken) -> Self {
        let stop = ctx.child_token();
        let (tx, rx) = kanal::bounded_async(0);
        let task = tokio::spawn(inner.run(stop.clone(), tx));
        Self { rx, stop, task }
    }

    /// Next inner tick; `None` once the inner schedule closed or `ctx` was
    /// cancelled.
    pub(crate) async fn recv(&self, ctx: &CancellationToken) -> Option<Tick> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            tick = self.rx.recv() => tick.ok(),
        }
    }

    /// Stops the inner schedule and returns its result.
    pub(crate) async fn finish(self) -> Result<()> {
        self.stop.cancel();
        drop(self.rx);
        self.task.await?
    }
}
