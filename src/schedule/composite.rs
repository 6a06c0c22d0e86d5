use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Schedule, TickSender};
use crate::error::Result;

/// Runs its steps one after another on the same output.
pub struct Composite {
    steps: Vec<Box<dyn Schedule>>,
}

impl Composite {
    pub fn new(steps: Vec<Box<dyn Schedule>>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Schedule for Composite {
    async fn run(self: Box<Self>, ctx: CancellationToken, out: TickSender) -> Result<()> {
        let total = self.steps.len();
        for (i, step) in self.steps.into_iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            debug!(step = i + 1, total, "schedule step started");
            step.run(ctx.clone(), out.clone()).await?;
        }
        Ok(())
    }
}
