use std::any::Any;
use std::fmt::Write as _;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{emit, Ammo, AmmoKind, AmmoReceiver, Outlet, Provider};
use crate::ammo::http::DEFAULT_TAG;
use crate::error::Result;
use crate::pool::Pool;

/// Synthetic ammo carrying only a message. For smoke runs.
#[derive(Debug, Default)]
pub struct LogAmmo {
    pub message: String,
}

impl Ammo for LogAmmo {
    fn kind(&self) -> AmmoKind {
        AmmoKind::Log
    }

    fn tag(&self) -> &str {
        DEFAULT_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Emits `limit` ammo numbered `Job #0`, `Job #1`, … (`0` = forever).
pub struct LogProvider {
    limit: u64,
    pool: Pool<LogAmmo>,
    outlet: Outlet,
}

impl LogProvider {
    pub fn new(limit: u64, buffer: usize) -> Self {
        Self {
            limit,
            pool: Pool::new(buffer.max(16) * 2),
            outlet: Outlet::new(buffer),
        }
    }
}

#[async_trait]
impl Provider for LogProvider {
    fn kind(&self) -> AmmoKind {
        AmmoKind::Log
    }

    fn source(&self) -> AmmoReceiver {
        self.outlet.receiver()
    }

    fn release(&self, ammo: Box<dyn Ammo>) {
        if let Ok(ammo) = ammo.into_any().downcast::<LogAmmo>() {
            self.pool.put(ammo);
        }
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let tx = self.outlet.take_sender("log provider")?;
        let mut emitted = 0u64;
        while self.limit == 0 || emitted < self.limit {
            let mut ammo = self.pool.get();
            ammo.message.clear();
            let _ = write!(ammo.message, "Job #{emitted}");
            if !emit(&tx, &ctx, ammo).await {
                break;
            }
            emitted += 1;
        }
        debug!(emitted, "log provider finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_limit_jobs_then_closes() {
        let provider = LogProvider::new(5, 2);
        let source = provider.source();
        let ctx = CancellationToken::new();

        let consume = async {
            let mut messages = Vec::new();
            while let Ok(ammo) = source.recv().await {
                let log = ammo.as_any().downcast_ref::<LogAmmo>().unwrap();
                messages.push(log.message.clone());
                assert_eq!(ammo.tag(), "REQUEST");
                provider.release(ammo);
            }
            messages
        };
        let (res, messages) = tokio::join!(provider.run(ctx), consume);
        res.unwrap();
        assert_eq!(messages, ["Job #0", "Job #1", "Job #2", "Job #3", "Job #4"]);
    }

    #[tokio::test]
    async fn cancellation_closes_unbounded_source() {
        let provider = LogProvider::new(0, 4);
        let source = provider.source();
        let ctx = CancellationToken::new();
        let consume = async {
            let mut seen = 0;
            while let Ok(ammo) = source.recv().await {
                seen += 1;
                provider.release(ammo);
                if seen == 10 {
                    ctx.cancel();
                }
            }
            seen
        };
        let (res, seen) = tokio::join!(provider.run(ctx.clone()), consume);
        res.unwrap();
        assert!(seen >= 10);
    }

    #[tokio::test]
    async fn runs_only_once() {
        let provider = LogProvider::new(1, 1);
        let ctx = CancellationToken::new();
        ctx.cancel();
        provider.run(ctx.clone()).await.unwrap();
        assert!(provider.run(ctx).await.is_err());
    }
}
