use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Gun, GunBase};
use crate::aggregate::SampleSender;
use crate::ammo::Ammo;
use crate::error::Result;
use crate::sample::{self, Sample};

/// Logs the ammo instead of sending it anywhere. Every shot succeeds with
/// code 200.
#[derive(Debug, Default)]
pub struct LogGun {
    base: GunBase,
}

impl LogGun {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Gun for LogGun {
    fn bind(&mut self, sink: SampleSender) {
        self.base.bind(sink);
    }

    async fn shoot(&self, _ctx: &CancellationToken, ammo: &dyn Ammo) -> Result<()> {
        let mut sample = sample::acquire(ammo.tag());
        debug!(?ammo, "pew");
        sample.set_proto_code(200);
        self.report(sample).await;
        Ok(())
    }

    async fn report(&self, sample: Box<Sample>) {
        self.base.report(sample).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ammo::LogAmmo;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn shot_reports_success() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut gun = LogGun::new();
        gun.bind(tx);
        let ammo = LogAmmo {
            message: "Job #0".into(),
        };
        gun.shoot(&CancellationToken::new(), &ammo).await.unwrap();

        let s = rx.recv().await.unwrap();
        assert_eq!(s.proto_code(), 200);
        assert_eq!(s.tag(), "REQUEST");
        assert!(s.rtt() > 0);
        assert!(s.err().is_none());
    }
}
