use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{GunFactory, ScheduleFactory};
use crate::aggregate::Aggregator;
use crate::ammo::Provider;
use crate::error::{self, Error, Result};
use crate::schedule::{self, TickReceiver};
use crate::user::{User, UserSchedule};

/// A homogeneous group of users sharing one ammo provider, one aggregator
/// and one scheduling policy.
pub struct UserPool {
    pub id: String,
    pub gun: GunFactory,
    pub provider: Arc<dyn Provider>,
    pub aggregator: Arc<dyn Aggregator>,
    /// Builds the schedule of every user, or the single shared one.
    pub schedule: ScheduleFactory,
    /// Each tick of the startup schedule starts one user.
    pub startup: ScheduleFactory,
    pub shared_schedule: bool,
}

/// Spawned collaborator whose failure tears the whole pool down.
fn supervise<F>(name: &'static str, pool_ctx: &CancellationToken, fut: F) -> JoinHandle<Result<()>>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let pool_ctx = pool_ctx.clone();
    tokio::spawn(async move {
        let res = fut.await;
        if let Err(err) = &res {
            if !err.is_cancelled() {
                error!(task = name, error = %err, "pool task failed, stopping pool");
                pool_ctx.cancel();
            }
        }
        res
    })
}

async fn joined(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await.map_err(Error::from).and_then(|r| r)
}

impl UserPool {
    /// Runs the pool until its users are done.
    ///
    /// The aggregator runs under its own context, cancelled only after
    /// every user has returned, so no sample meets a closed sink. Provider
    /// and schedules run under a child of `ctx` and are stopped once the
    /// users are gone.
    ///
    /// Returns `Error::Cancelled` when `ctx` was cancelled and nothing
    /// else failed.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(pool = %self.id, shared_schedule = self.shared_schedule, "pool started");
        let pool_ctx = ctx.child_token();
        let results_ctx = CancellationToken::new();
        let mut errors = Vec::new();

        let aggregator = supervise("aggregator", &pool_ctx, {
            let (agg, ctx) = (self.aggregator.clone(), results_ctx.clone());
            async move { agg.run(ctx).await }
        });

        let source_done = CancellationToken::new();
        let provider = supervise("provider", &pool_ctx, {
            let (provider, ctx, done) = (self.provider.clone(), pool_ctx.clone(), source_done.clone());
            async move {
                let res = provider.run(ctx).await;
                done.cancel();
                res
            }
        });

        let (users, shared) = self.start_users(&pool_ctx, &source_done, &mut errors).await;
        let started = users.len();
        errors.extend(join_users(users).await);
        info!(pool = %self.id, users = started, "users finished");

        pool_ctx.cancel();
        errors.extend(joined(provider).await.err());
        if let Some(task) = shared {
            errors.extend(joined(task).await.err());
        }

        results_ctx.cancel();
        errors.extend(joined(aggregator).await.err());

        match error::union(errors) {
            Ok(()) if ctx.is_cancelled() => {
                info!(pool = %self.id, "pool cancelled");
                Err(Error::Cancelled)
            }
            Ok(()) => {
                info!(pool = %self.id, "pool finished");
                Ok(())
            }
            Err(err) => {
                error!(pool = %self.id, error = %err, "pool failed");
                Err(err)
            }
        }
    }

    /// Consumes the startup schedule, starting one user per tick, until it
    /// closes, the ammo runs out, or the pool is stopped. Also returns the
    /// shared schedule task, left running for the users.
    async fn start_users(
        &self,
        pool_ctx: &CancellationToken,
        source_done: &CancellationToken,
        errors: &mut Vec<Error>,
    ) -> (JoinSet<Result<()>>, Option<JoinHandle<Result<()>>>) {
        let mut users = JoinSet::new();

        let shared = if self.shared_schedule {
            match (self.schedule)() {
                Ok(s) => Some(schedule::start(s, pool_ctx.clone())),
                Err(err) => {
                    errors.push(err);
                    pool_ctx.cancel();
                    return (users, None);
                }
            }
        } else {
            None
        };
        let (shared_ticks, shared_task): (Option<TickReceiver>, _) = match shared {
            Some((rx, task)) => (Some(rx), Some(task)),
            None => (None, None),
        };

        let startup = match (self.startup)() {
            Ok(s) => s,
            Err(err) => {
                errors.push(err);
                pool_ctx.cancel();
                return (users, shared_task);
            }
        };
        let startup_ctx = pool_ctx.child_token();
        let (starts, startup_task) = schedule::start(startup, startup_ctx.clone());

        let source = self.provider.source();
        let exhausted = CancellationToken::new();
        let mut next_id = 0usize;
        loop {
            let tick = tokio::select! {
                biased;
                _ = pool_ctx.cancelled() => break,
                _ = exhausted.cancelled() => break,
                tick = starts.recv() => tick,
            };
            if tick.is_err() {
                debug!(pool = %self.id, "startup schedule closed");
                break;
            }
            if source_done.is_cancelled() && source.is_empty() {
                debug!(pool = %self.id, "ammo exhausted, no more users");
                break;
            }
            match self.new_user(next_id, &shared_ticks, &exhausted) {
                Ok(None) => {
                    debug!(pool = %self.id, "result sink closed, no more users");
                    break;
                }
                Ok(Some(user)) => {
                    users.spawn(user.run(pool_ctx.clone()));
                    debug!(pool = %self.id, user = next_id, "user started");
                    next_id += 1;
                }
                Err(err) => {
                    errors.push(err);
                    pool_ctx.cancel();
                    break;
                }
            }
        }

        startup_ctx.cancel();
        drop(starts);
        errors.extend(joined(startup_task).await.err());
        (users, shared_task)
    }

    /// `None` once the aggregator has closed its sink. Its own failure is
    /// already on the way to the pool.
    fn new_user(
        &self,
        id: usize,
        shared_ticks: &Option<TickReceiver>,
        exhausted: &CancellationToken,
    ) -> Result<Option<User>> {
        let sink = self.aggregator.sink();
        if sink.is_closed() {
            return Ok(None);
        }
        let mut gun = (self.gun)()?;
        gun.bind(sink);
        let schedule = match shared_ticks {
            Some(ticks) => UserSchedule::Shared(ticks.clone()),
            None => UserSchedule::Own((self.schedule)()?),
        };
        Ok(Some(User::new(
            id,
            gun,
            self.provider.clone(),
            schedule,
            exhausted.clone(),
        )))
    }
}

async fn join_users(mut users: JoinSet<Result<()>>) -> Vec<Error> {
    let mut errors = Vec::new();
    while let Some(res) = users.join_next().await {
        if let Err(err) = res.map_err(Error::from).and_then(|r| r) {
            errors.push(err);
        }
    }
    errors
}
