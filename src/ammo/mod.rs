//! Ammo: pre-decoded request descriptors and the providers streaming them.
//!
//! A provider owns an object pool. Its `run` fills pooled instances and
//! pushes them into a bounded multi-consumer channel; user workers take
//! them from `source()`, fire, and hand them back through `release`. The
//! channel closes when the input is exhausted or the context is cancelled.

pub mod file;
pub mod http;
pub mod jsonline;
pub mod log;
pub mod uribody;
pub mod urilist;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use file::{AmmoInput, AmmoSource, Decoder, FileProvider, FileSettings, LineReader};
pub use http::HttpAmmo;
pub use jsonline::{JsonLineDecoder, JsonLineProvider};
pub use log::{LogAmmo, LogProvider};
pub use uribody::{UriBodyDecoder, UriBodyProvider};
pub use urilist::{UriListDecoder, UriListProvider};

/// Default depth of a provider's ammo channel.
pub const DEFAULT_AMMO_BUFFER: usize = 128;

pub type AmmoSender = kanal::AsyncSender<Box<dyn Ammo>>;
pub type AmmoReceiver = kanal::AsyncReceiver<Box<dyn Ammo>>;

/// Family an ammo belongs to; guns declare which families they can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmoKind {
    Log,
    Http,
}

impl fmt::Display for AmmoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AmmoKind::Log => "log",
            AmmoKind::Http => "http",
        })
    }
}

pub trait Ammo: fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> AmmoKind;

    /// Label copied into the sample of every shot made with this ammo.
    fn tag(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> AmmoKind;

    /// Read end of the ammo channel. Every user gets a clone.
    fn source(&self) -> AmmoReceiver;

    /// Takes back an ammo after it was fired.
    fn release(&self, ammo: Box<dyn Ammo>);

    async fn run(&self, ctx: CancellationToken) -> Result<()>;
}

// ─── Outlet ──────────────────────────────────────────────────────

/// Ammo channel whose send side is handed to `run` exactly once.
///
/// Dropping the taken sender when `run` returns is what closes the
/// channel, on exhaustion and on cancellation alike.
pub struct Outlet {
    tx: Mutex<Option<AmmoSender>>,
    rx: AmmoReceiver,
}

impl Outlet {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = kanal::bounded_async(buffer);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn receiver(&self) -> AmmoReceiver {
        self.rx.clone()
    }

    pub fn take_sender(&self, who: &'static str) -> Result<AmmoSender> {
        self.tx.lock().take().ok_or(Error::AlreadyRunning(who))
    }
}

/// Sends `ammo` unless cancelled first. `false` means stop producing.
pub(crate) async fn emit(tx: &AmmoSender, ctx: &CancellationToken, ammo: Box<dyn Ammo>) -> bool {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => false,
        sent = tx.send(ammo) => sent.is_ok(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use reqwest::Method;

    /// What a drained HTTP ammo looked like when it left the provider.
    #[derive(Debug)]
    pub struct Fired {
        pub method: Method,
        pub url: String,
        pub path: String,
        pub headers: Vec<(String, String)>,
        pub tag: String,
        pub body: Option<Vec<u8>>,
    }

    /// Runs `provider` while draining its source. With `Some(n)` the run is
    /// cancelled once `n` ammo have been taken.
    pub async fn collect<P: Provider + ?Sized>(
        provider: &P,
        cancel_after: Option<usize>,
    ) -> (Result<()>, Vec<Fired>) {
        let source = provider.source();
        let ctx = CancellationToken::new();
        let consume = async {
            let mut fired = Vec::new();
            while let Ok(ammo) = source.recv().await {
                let http = ammo.as_any().downcast_ref::<HttpAmmo>().expect("http ammo");
                let req = http.prepared().expect("prepared request");
                fired.push(Fired {
                    method: req.method().clone(),
                    url: req.url().to_string(),
                    path: req.url().path().to_owned(),
                    headers: req
                        .headers()
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_owned()))
                        .collect(),
                    tag: ammo.tag().to_owned(),
                    body: req.body().and_then(|b| b.as_bytes()).map(<[u8]>::to_vec),
                });
                provider.release(ammo);
                if cancel_after == Some(fired.len()) {
                    ctx.cancel();
                }
            }
            fired
        };
        tokio::join!(provider.run(ctx.clone()), consume)
    }
}
