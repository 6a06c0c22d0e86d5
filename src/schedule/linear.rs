use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::{emit, Schedule, TickSender};
use crate::error::{Error, Result};

/// Ramps the rate linearly from `start_rps` to `end_rps` over `duration`.
///
/// With `a = (end - start) / (2 * duration)` and `b = start`, the number of
/// ticks due by time `t` is `a*t^2 + b*t`. Tick `n` fires at the positive
/// root of `a*t^2 + b*t - n = 0`, and every `n < a*T^2 + b*T` is fired.
#[derive(Debug, Clone, Copy)]
pub struct Linear {
    a: f64,
    b: f64,
    total: u64,
}

impl Linear {
    pub fn new(start_rps: f64, end_rps: f64, duration: Duration) -> Result<Self> {
        if !(start_rps >= 0.0 && end_rps >= 0.0) || !start_rps.is_finite() || !end_rps.is_finite() {
            return Err(Error::Config(format!(
                "linear schedule rates must be non-negative, got {start_rps}..{end_rps}"
            )));
        }
        if duration.is_zero() {
            return Err(Error::Config("linear schedule needs a non-zero duration".into()));
        }
        let d = duration.as_secs_f64();
        let a = (end_rps - start_rps) / (2.0 * d);
        let b = start_rps;
        // Round away float noise before counting whole ticks.
        let due = ((a * d * d + b * d) * 1e9).round() / 1e9;
        Ok(Self {
            a,
            b,
            total: due.ceil() as u64,
        })
    }

    /// Number of ticks the ramp emits.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Offset of tick `n` from the start.
    pub fn at(&self, n: u64) -> Result<Duration> {
        if n == 0 {
            return Ok(Duration::ZERO);
        }
        let n = n as f64;
        let secs = if self.a.abs() < f64::EPSILON {
            if self.b <= 0.0 {
                return Err(Error::Schedule("linear schedule has a zero rate".into()));
            }
            n / self.b
        } else {
            let disc = self.b * self.b + 4.0 * self.a * n;
            if disc < 0.0 {
                return Err(Error::Schedule(format!(
                    "linear schedule: negative discriminant for tick {n}"
                )));
            }
            (-self.b + disc.sqrt()) / (2.0 * self.a)
        };
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[async_trait]
impl Schedule for Linear {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        let start = Instant::now();
        for n in 0..self.total {
            let deadline = start + self.at(n)?;
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                _ = sleep_until(deadline) => {}
            }
            if !emit(&out, &ctx).await {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::{ms, tick_times};

    #[tokio::test(start_paused = true)]
    async fn ramp_five_to_six_over_a_second() {
        let times = tick_times(Box::new(Linear::new(5.0, 6.0, ms(1000)).unwrap()), None)
            .await
            .unwrap();
        assert_eq!(times.len(), 6);
        assert!(times[0] <= ms(10));
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert!(*times.last().unwrap() <= ms(1000));
    }

    #[test]
    fn count_due_by_time_follows_quadratic() {
        let ramp = Linear::new(10.0, 30.0, Duration::from_secs(2)).unwrap();
        assert_eq!(ramp.total(), 40);
        // a = 5, b = 10: ticks due by t are those with at(n) <= t.
        for t in [0.25f64, 0.5, 1.2, 1.5] {
            let due = (5.0 * t * t + 10.0 * t).floor() as u64;
            let fired = (0..ramp.total())
                .filter(|&n| ramp.at(n).unwrap().as_secs_f64() <= t + 1e-9)
                .count() as u64;
            assert_eq!(fired, due + 1, "at t={t}");
        }
    }

    #[test]
    fn decreasing_ramp_is_monotonic() {
        let ramp = Linear::new(100.0, 10.0, Duration::from_secs(1)).unwrap();
        assert_eq!(ramp.total(), 55);
        let mut last = Duration::ZERO;
        for n in 1..ramp.total() {
            let at = ramp.at(n).unwrap();
            assert!(at > last);
            last = at;
        }
        assert!(last <= Duration::from_secs(1));
    }

    #[test]
    fn constant_rate() {
        let ramp = Linear::new(4.0, 4.0, Duration::from_secs(1)).unwrap();
        assert_eq!(ramp.total(), 4);
        assert_eq!(ramp.at(2).unwrap(), ms(500));
    }

    #[test]
    fn invalid_parameters() {
        assert!(Linear::new(-1.0, 5.0, ms(10)).is_err());
        assert!(Linear::new(1.0, 5.0, Duration::ZERO).is_err());
        assert!(Linear::new(f64::NAN, 5.0, ms(10)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_ramp() {
        let times = tick_times(Box::new(Linear::new(10.0, 10.0, ms(1000)).unwrap()), Some(ms(250)))
            .await
            .unwrap();
        assert_eq!(times.len(), 3);
    }
}
