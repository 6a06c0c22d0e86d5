//! Guns: fire one ammo at the target and report the resulting sample.

pub mod http;
pub mod log;

use async_trait::async_trait;
use tokio::sync::mpsc::error::SendError;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::aggregate::SampleSender;
use crate::ammo::Ammo;
use crate::error::{BoxError, Result};
use crate::sample::{self, Sample};

pub use self::http::{HttpGun, HttpGunConfig, Scheme, ShotError};
pub use self::log::LogGun;

/// One protocol client.
///
/// A gun is bound to an aggregator sink exactly once, before its first
/// shot. Every shot pushes exactly one sample into that sink, blocking
/// while the sink is full. Transport failures end up on the sample; an
/// `Err` from `shoot` means the gun could not use the ammo at all.
#[async_trait]
pub trait Gun: Send + Sync {
    fn bind(&mut self, sink: SampleSender);

    /// Called before every shot. A failure skips the shot and is reported
    /// as an error sample.
    async fn connect(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }

    async fn shoot(&self, ctx: &CancellationToken, ammo: &dyn Ammo) -> Result<()>;

    /// Pushes a finished sample to the bound sink.
    async fn report(&self, sample: Box<Sample>);
}

/// Runs the connect hook, then shoots.
pub async fn fire(gun: &dyn Gun, ctx: &CancellationToken, ammo: &dyn Ammo) -> Result<()> {
    if let Err(err) = gun.connect(ctx).await {
        let mut sample = sample::acquire(ammo.tag());
        sample.set_err(err);
        gun.report(sample).await;
        return Ok(());
    }
    gun.shoot(ctx, ammo).await
}

// ─── Bind / report plumbing ──────────────────────────────────────

/// Sink handling shared by every gun.
#[derive(Debug, Default)]
pub struct GunBase {
    sink: Option<SampleSender>,
}

impl GunBase {
    /// Panics on a second bind. Samples sent to a sink that has since
    /// closed are dropped by `report`.
    pub fn bind(&mut self, sink: SampleSender) {
        assert!(self.sink.is_none(), "gun is already bound to a sink");
        self.sink = Some(sink);
    }

    pub fn is_bound(&self) -> bool {
        self.sink.is_some()
    }

    /// Panics when the gun was never bound.
    pub async fn report(&self, sample: Box<Sample>) {
        let Some(sink) = &self.sink else {
            panic!("gun fired before bind");
        };
        if let Err(SendError(sample)) = sink.send(sample).await {
            trace!("sink closed, sample dropped");
            sample::release(sample);
        }
    }
}
