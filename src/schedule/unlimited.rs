use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{emit, Schedule, TickSender};
use crate::error::Result;

/// Emits as fast as consumers take ticks; closes only on cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl Schedule for Unlimited {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        while emit(&out, &ctx).await {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::start;

    #[tokio::test]
    async fn runs_until_cancelled() {
        let ctx = CancellationToken::new();
        let (rx, task) = start(Box::new(Unlimited), ctx.clone());
        for _ in 0..1000 {
            rx.recv().await.unwrap();
        }
        ctx.cancel();
        while rx.recv().await.is_ok() {}
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stops_when_consumer_leaves() {
        let (rx, task) = start(Box::new(Unlimited), CancellationToken::new());
        rx.recv().await.unwrap();
        drop(rx);
        task.await.unwrap().unwrap();
    }
}
