use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{emit, Relay, Schedule, TickSender};
use crate::error::Result;

/// Turns every inner tick into `batch` ticks.
pub struct Batch {
    batch: u64,
    inner: Box<dyn Schedule>,
}

impl Batch {
    pub fn new(batch: u64, inner: Box<dyn Schedule>) -> Self {
        Self { batch, inner }
    }
}

#[async_trait]
impl Schedule for Batch {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        let Batch { batch, inner } = *self;
        let relay = Relay::spawn(inner, &ctx);
        'outer: while relay.recv(&ctx).await.is_some() {
            for _ in 0..batch {
                if !emit(&out, &ctx).await {
                    break 'outer;
                }
            }
        }
        drop(out);
        relay.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::{ms, tick_times};
    use crate::schedule::{Periodic, Size, Unlimited};

    #[tokio::test]
    async fn multiplies_inner_ticks() {
        let inner = Box::new(Size::new(4, Box::new(Unlimited)));
        let times = tick_times(Box::new(Batch::new(3, inner)), None).await.unwrap();
        assert_eq!(times.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_share_the_inner_tick_time() {
        let periodic = Box::new(Periodic::new(ms(50)).unwrap());
        let inner = Box::new(Size::new(2, periodic));
        let times = tick_times(Box::new(Batch::new(2, inner)), None).await.unwrap();
        assert_eq!(times, [ms(0), ms(0), ms(50), ms(50)]);
    }
}
