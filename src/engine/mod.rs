//! Engine: runs every configured user pool side by side.

pub mod pool;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{GlobalConfig, Registry};
use crate::error::{self, Error, Result};
use crate::gun::Gun;
use crate::schedule::Schedule;

pub use pool::UserPool;

/// Builds a fresh gun for every user.
pub type GunFactory = Arc<dyn Fn() -> Result<Box<dyn Gun>> + Send + Sync>;

/// Builds a fresh schedule; schedules are single-shot.
pub type ScheduleFactory = Arc<dyn Fn() -> Result<Box<dyn Schedule>> + Send + Sync>;

pub struct Engine {
    pools: Vec<Arc<UserPool>>,
}

impl Engine {
    pub fn new(pools: Vec<UserPool>) -> Self {
        Self {
            pools: pools.into_iter().map(Arc::new).collect(),
        }
    }

    /// Builds an engine from `config` with the built-in plugins.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Registry::new().build(config)
    }

    pub fn pools(&self) -> impl Iterator<Item = &UserPool> {
        self.pools.iter().map(Arc::as_ref)
    }

    /// Runs all pools until they finish or `ctx` is cancelled. The first
    /// failing pool stops the others; every failure is reported. A run
    /// stopped through `ctx` without failures ends in `Error::Cancelled`.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(pools = self.pools.len(), "engine started");
        let engine_ctx = ctx.child_token();

        let mut running = JoinSet::new();
        for pool in &self.pools {
            let (pool, ctx) = (pool.clone(), engine_ctx.clone());
            running.spawn(async move { pool.run(ctx).await });
        }

        let mut errors = Vec::new();
        while let Some(res) = running.join_next().await {
            if let Err(err) = res.map_err(Error::from).and_then(|r| r) {
                if !err.is_cancelled() && !engine_ctx.is_cancelled() {
                    error!(error = %err, "pool failed, stopping engine");
                    engine_ctx.cancel();
                }
                errors.push(err);
            }
        }

        error::union(errors)?;
        if ctx.is_cancelled() {
            info!("engine cancelled");
            return Err(Error::Cancelled);
        }
        info!("engine finished");
        Ok(())
    }
}
