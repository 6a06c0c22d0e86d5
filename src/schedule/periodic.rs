use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{emit, Batch, Schedule, Size, TickSender};
use crate::error::{Error, Result};

/// One tick right away, then one every `period`.
///
/// Tick times are fixed offsets from the start, so a slow consumer delays
/// delivery but never shifts later ticks. Slots missed while the consumer
/// stalls beyond the channel buffer are skipped, not replayed in a burst.
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period: Duration,
}

impl Periodic {
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config("periodic schedule needs a non-zero period".into()));
        }
        Ok(Self { period })
    }
}

#[async_trait]
impl Schedule for Periodic {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        let mut interval = interval_at(Instant::now(), self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(interval);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                next = ticks.next() => if next.is_none() { return Ok(()) },
            }
            if !emit(&out, &ctx).await {
                return Ok(());
            }
        }
    }
}

/// Periodic schedule with optional batching and an overall tick cap:
/// every period fires `batch` ticks, and at most `max` ticks in total.
pub fn periodic(period: Duration, batch: Option<u64>, max: Option<u64>) -> Result<Box<dyn Schedule>> {
    let mut schedule: Box<dyn Schedule> = Box::new(Periodic::new(period)?);
    if let Some(batch) = batch.filter(|&b| b > 1) {
        schedule = Box::new(Batch::new(batch, schedule));
    }
    if let Some(max) = max {
        schedule = Box::new(Size::new(max, schedule));
    }
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::{ms, tick_times};

    #[tokio::test(start_paused = true)]
    async fn cancelled_after_three_periods() {
        let times = tick_times(Box::new(Periodic::new(ms(2)).unwrap()), Some(ms(7)))
            .await
            .unwrap();
        assert_eq!(times, [ms(0), ms(2), ms(4), ms(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn kth_tick_not_before_k_periods() {
        let times = tick_times(periodic(ms(10), None, Some(20)).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(times.len(), 20);
        for (k, at) in times.iter().enumerate() {
            assert!(*at >= ms(10) * k as u32, "tick {k} at {at:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn options_batch_and_cap() {
        let times = tick_times(periodic(ms(100), Some(3), Some(7)).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            times,
            [ms(0), ms(0), ms(0), ms(100), ms(100), ms(100), ms(200)]
        );
    }

    #[test]
    fn zero_period_rejected() {
        assert!(matches!(Periodic::new(Duration::ZERO), Err(Error::Config(_))));
    }
}
