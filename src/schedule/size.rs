use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{emit, Relay, Schedule, TickSender};
use crate::error::Result;

/// Forwards at most `size` ticks of the inner schedule, then closes.
pub struct Size {
    size: u64,
    inner: Box<dyn Schedule>,
}

impl Size {
    pub fn new(size: u64, inner: Box<dyn Schedule>) -> Self {
        Self { size, inner }
    }
}

#[async_trait]
impl Schedule for Size {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        let Size { size, inner } = *self;
        let relay = Relay::spawn(inner, &ctx);
        let mut sent = 0;
        while sent < size {
            if relay.recv(&ctx).await.is_none() || !emit(&out, &ctx).await {
                break;
            }
            sent += 1;
        }
        drop(out);
        relay.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::tick_times;
    use crate::schedule::{start, Unlimited};

    #[tokio::test]
    async fn caps_a_longer_inner_schedule() {
        let master = Box::new(Size::new(10, Box::new(Unlimited)));
        let ctx = CancellationToken::new();
        let (rx, task) = start(Box::new(Size::new(5, master)), ctx);
        let mut seen = 0;
        while rx.recv().await.is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 5);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closes_with_a_shorter_inner_schedule() {
        let inner = Box::new(Size::new(3, Box::new(Unlimited)));
        let times = tick_times(Box::new(Size::new(100, inner)), None).await.unwrap();
        assert_eq!(times.len(), 3);
    }

    #[tokio::test]
    async fn zero_size_emits_nothing() {
        let times = tick_times(Box::new(Size::new(0, Box::new(Unlimited))), None)
            .await
            .unwrap();
        assert!(times.is_empty());
    }
}
