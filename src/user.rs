use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ammo::{AmmoReceiver, Provider};
use crate::error::{self, Result};
use crate::gun::{self, Gun};
use crate::schedule::{self, Schedule, TickReceiver};

/// Where a user takes its ticks from.
pub enum UserSchedule {
    /// A pool-wide tick stream, shared with every other user of the pool.
    Shared(TickReceiver),
    /// A schedule of the user's own, started when the user runs.
    Own(Box<dyn Schedule>),
}

/// One worker: pairs each ammo with a tick and fires it through its gun.
pub struct User {
    id: usize,
    gun: Box<dyn Gun>,
    provider: Arc<dyn Provider>,
    ammo: AmmoReceiver,
    schedule: UserSchedule,
    exhausted: CancellationToken,
}

impl User {
    /// `gun` must already be bound. `exhausted` is cancelled once this
    /// user finds the ammo source closed and empty.
    pub fn new(
        id: usize,
        gun: Box<dyn Gun>,
        provider: Arc<dyn Provider>,
        schedule: UserSchedule,
        exhausted: CancellationToken,
    ) -> Self {
        let ammo = provider.source();
        Self {
            id,
            gun,
            provider,
            ammo,
            schedule,
            exhausted,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Shoots until the ammo or the ticks run out, or `ctx` is cancelled.
    /// Shot failures only show up on samples.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let User {
            id,
            gun,
            provider,
            ammo,
            schedule,
            exhausted,
        } = self;

        let (ticks, own) = match schedule {
            UserSchedule::Shared(ticks) => (ticks, None),
            UserSchedule::Own(schedule) => {
                let stop = ctx.child_token();
                let (ticks, task) = schedule::start(schedule, stop.clone());
                (ticks, Some((stop, task)))
            }
        };

        let mut shots = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = ammo.recv() => next,
            };
            let Ok(next) = next else {
                exhausted.cancel();
                break;
            };

            let tick = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                tick = ticks.recv() => tick.ok(),
            };
            if tick.is_none() {
                provider.release(next);
                break;
            }

            if let Err(err) = gun::fire(gun.as_ref(), &ctx, next.as_ref()).await {
                warn!(user = id, error = %err, "shot skipped");
            }
            provider.release(next);
            shots += 1;
        }
        debug!(user = id, shots, "user finished");

        match own {
            Some((stop, task)) => {
                stop.cancel();
                drop(ticks);
                let res = task.await.map_err(error::Error::from).and_then(|r| r);
                error::union(res.err())
            }
            None => Ok(()),
        }
    }
}
