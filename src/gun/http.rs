use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client, Request, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Gun, GunBase};
use crate::aggregate::SampleSender;
use crate::ammo::{Ammo, HttpAmmo};
use crate::config::{duration, opt_duration};
use crate::error::{Error, Result};
use crate::sample::{self, Field, Sample};

// ─── Config ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// HTTP gun parameters. Durations are humantime strings (`"3s"`, `"500ms"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpGunConfig {
    /// `host:port` every request is sent to.
    pub target: String,
    #[serde(default)]
    pub scheme: Scheme,

    #[serde(default = "defaults::tls_handshake", deserialize_with = "duration::deserialize")]
    pub tls_handshake_timeout: Duration,
    #[serde(default, deserialize_with = "opt_duration::deserialize")]
    pub response_header_timeout: Option<Duration>,
    #[serde(default = "defaults::expect_continue", deserialize_with = "duration::deserialize")]
    pub expect_continue_timeout: Duration,
    #[serde(default = "defaults::idle_conn", deserialize_with = "duration::deserialize")]
    pub idle_conn_timeout: Duration,

    #[serde(default = "defaults::dial_timeout", deserialize_with = "duration::deserialize")]
    pub dial_timeout: Duration,
    #[serde(default = "defaults::dial_keep_alive", deserialize_with = "duration::deserialize")]
    pub dial_keep_alive: Duration,
    #[serde(default = "defaults::enabled")]
    pub dial_dual_stack: bool,
    #[serde(default, deserialize_with = "opt_duration::deserialize")]
    pub dial_fallback_delay: Option<Duration>,

    /// 0 = unlimited.
    #[serde(default)]
    pub max_idle_conns: usize,
    #[serde(default)]
    pub max_idle_conns_per_host: Option<usize>,
    #[serde(default)]
    pub disable_keep_alives: bool,
    #[serde(default)]
    pub disable_compression: bool,
}

mod defaults {
    use std::time::Duration;

    pub fn tls_handshake() -> Duration {
        Duration::from_secs(1)
    }
    pub fn expect_continue() -> Duration {
        Duration::from_secs(1)
    }
    pub fn idle_conn() -> Duration {
        Duration::from_secs(90)
    }
    pub fn dial_timeout() -> Duration {
        Duration::from_secs(3)
    }
    pub fn dial_keep_alive() -> Duration {
        Duration::from_secs(120)
    }
    pub fn enabled() -> bool {
        true
    }
}

impl HttpGunConfig {
    /// Config with every option at its default.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            scheme: Scheme::Http,
            tls_handshake_timeout: defaults::tls_handshake(),
            response_header_timeout: None,
            expect_continue_timeout: defaults::expect_continue(),
            idle_conn_timeout: defaults::idle_conn(),
            dial_timeout: defaults::dial_timeout(),
            dial_keep_alive: defaults::dial_keep_alive(),
            dial_dual_stack: true,
            dial_fallback_delay: None,
            max_idle_conns: 0,
            max_idle_conns_per_host: None,
            disable_keep_alives: false,
            disable_compression: false,
        }
    }

    /// Splits `target` into host and port.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let invalid = || Error::Config(format!("http gun target {:?} is not host:port", self.target));
        let (host, port) = self.target.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok((host.to_owned(), port))
    }

    fn client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout())
            .pool_idle_timeout(self.idle_conn_timeout)
            .tcp_keepalive(self.dial_keep_alive)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .no_proxy();
        if self.disable_keep_alives {
            builder = builder.pool_max_idle_per_host(0);
        } else if let Some(per_host) = self.max_idle_conns_per_host {
            builder = builder.pool_max_idle_per_host(per_host);
        }
        if self.disable_compression {
            builder = builder.no_gzip();
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build http client: {e}")))
    }

    /// Dial time plus the handshake allowance on TLS targets.
    fn connect_timeout(&self) -> Duration {
        match self.scheme {
            Scheme::Http => self.dial_timeout,
            Scheme::Https => self.dial_timeout + self.tls_handshake_timeout,
        }
    }
}

// ─── Shot errors ─────────────────────────────────────────────────

/// Per-shot failures; recorded on the sample, never propagated.
#[derive(Debug, Error)]
pub enum ShotError {
    #[error("ammo has no prepared request")]
    Unprepared,

    #[error("cannot point request at {0}")]
    Target(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("no response headers within {0:?}")]
    HeaderTimeout(Duration),

    #[error("reading response body failed: {0}")]
    Body(#[source] reqwest::Error),

    #[error("shot cancelled")]
    Cancelled,
}

// ─── Gun ─────────────────────────────────────────────────────────

/// Sends HTTP ammo to one `host:port` over a pooled keep-alive client.
pub struct HttpGun {
    base: GunBase,
    client: Client,
    scheme: Scheme,
    host: String,
    port: u16,
    response_header_timeout: Option<Duration>,
}

impl HttpGun {
    pub fn new(config: &HttpGunConfig) -> Result<Self> {
        let (host, port) = config.host_port()?;
        if config.max_idle_conns > 0 || !config.dial_dual_stack || config.dial_fallback_delay.is_some() {
            debug!(
                max_idle_conns = config.max_idle_conns,
                dual_stack = config.dial_dual_stack,
                "global idle cap and dial family options are left to the client defaults"
            );
        }
        Ok(Self {
            base: GunBase::default(),
            client: config.client()?,
            scheme: config.scheme,
            host,
            port,
            response_header_timeout: config.response_header_timeout,
        })
    }

    /// Points the request URL at the configured target.
    fn retarget(&self, url: &mut Url) -> std::result::Result<(), ShotError> {
        let target = || ShotError::Target(format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port));
        url.set_scheme(self.scheme.as_str()).map_err(|_| target())?;
        url.set_host(Some(&self.host)).map_err(|_| target())?;
        url.set_port(Some(self.port)).map_err(|_| target())?;
        Ok(())
    }

    async fn send(&self, req: Request) -> std::result::Result<reqwest::Response, ShotError> {
        let exec = self.client.execute(req);
        match self.response_header_timeout {
            Some(limit) => tokio::time::timeout(limit, exec)
                .await
                .map_err(|_| ShotError::HeaderTimeout(limit))?
                .map_err(ShotError::Request),
            None => exec.await.map_err(ShotError::Request),
        }
    }

    /// Performs the exchange, filling `s`. Transport failures are returned
    /// for the caller to record.
    async fn exchange(&self, mut req: Request, s: &mut Sample) -> std::result::Result<(), ShotError> {
        self.retarget(req.url_mut())?;
        s.set(Field::RequestBytes, request_size(&req));

        let started = Instant::now();
        let mut resp = self.send(req).await?;
        s.set_duration(Field::Latency, started.elapsed());

        let status = resp.status().as_u16();
        let mut received = header_size(&resp);
        let body_started = Instant::now();
        let drained = loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => received += chunk.len() as i64,
                Ok(None) => break Ok(()),
                Err(e) => break Err(ShotError::Body(e)),
            }
        };
        s.set_duration(Field::Receive, body_started.elapsed());
        s.set(Field::ResponseBytes, received);
        s.set_duration(Field::Rtt, started.elapsed());
        s.set_proto_code(status);
        drained
    }
}

#[async_trait]
impl Gun for HttpGun {
    fn bind(&mut self, sink: SampleSender) {
        self.base.bind(sink);
    }

    async fn shoot(&self, ctx: &CancellationToken, ammo: &dyn Ammo) -> Result<()> {
        let Some(http) = ammo.as_any().downcast_ref::<HttpAmmo>() else {
            return Err(Error::Gun(format!("http gun cannot fire {} ammo", ammo.kind())));
        };
        let Some((req, mut s)) = http.request() else {
            let mut s = sample::acquire(ammo.tag());
            s.set_err(ShotError::Unprepared);
            self.report(s).await;
            return Ok(());
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ShotError::Cancelled),
            res = self.exchange(req, &mut s) => res,
        };
        if let Err(err) = outcome {
            debug!(tag = s.tag(), error = %err, "shot failed");
            s.set_err(err);
        }
        self.report(s).await;
        Ok(())
    }

    async fn report(&self, sample: Box<Sample>) {
        self.base.report(sample).await;
    }
}

// ── Size estimates ──────────────────────────────────────────────

/// Bytes of an HTTP/1.1 request: request line, headers, body.
fn request_size(req: &Request) -> i64 {
    let url = req.url();
    let target = url.path().len() + url.query().map_or(0, |q| q.len() + 1);
    let line = req.method().as_str().len() + 1 + target + " HTTP/1.1\r\n".len();
    let headers: usize = req
        .headers()
        .iter()
        .map(|(k, v)| k.as_str().len() + 2 + v.len() + 2)
        .sum();
    let body = req.body().and_then(|b| b.as_bytes()).map_or(0, <[u8]>::len);
    (line + headers + 2 + body) as i64
}

/// Bytes of the status line and headers of `resp`.
fn header_size(resp: &reqwest::Response) -> i64 {
    let line = "HTTP/1.1 200 \r\n".len() + resp.status().canonical_reason().map_or(0, str::len);
    let headers: usize = resp
        .headers()
        .iter()
        .map(|(k, v)| k.as_str().len() + 2 + v.len() + 2)
        .sum();
    (line + headers + 2) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[test]
    fn parses_kebab_case_options_with_defaults() {
        let cfg: HttpGunConfig = serde_json::from_str(
            r#"{"target": "localhost:8080", "scheme": "https",
                "response-header-timeout": "250ms", "dial-timeout": "2s",
                "disable-keep-alives": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.scheme, Scheme::Https);
        assert_eq!(cfg.response_header_timeout, Some(Duration::from_millis(250)));
        assert_eq!(cfg.dial_timeout, Duration::from_secs(2));
        assert_eq!(cfg.idle_conn_timeout, Duration::from_secs(90));
        assert_eq!(cfg.dial_keep_alive, Duration::from_secs(120));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(3));
        assert!(cfg.disable_keep_alives);
    }

    #[test]
    fn rejects_unknown_options_and_bad_durations() {
        assert!(serde_json::from_str::<HttpGunConfig>(r#"{"target": "a:1", "bogus": 1}"#).is_err());
        assert!(serde_json::from_str::<HttpGunConfig>(r#"{"target": "a:1", "dial-timeout": "soon"}"#).is_err());
    }

    #[test]
    fn target_must_be_host_and_port() {
        assert_eq!(
            HttpGunConfig::new("example.com:443").host_port().unwrap(),
            ("example.com".to_owned(), 443)
        );
        assert_eq!(HttpGunConfig::new("[::1]:80").host_port().unwrap().0, "[::1]");
        for bad in ["example.com", ":80", "host:http", "host:70000"] {
            assert!(HttpGunConfig::new(bad).host_port().is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn retargets_scheme_host_and_port() {
        let mut cfg = HttpGunConfig::new("127.0.0.1:9000");
        cfg.scheme = Scheme::Https;
        let gun = HttpGun::new(&cfg).unwrap();
        let mut url = Url::parse("http://localhost/a/b?c=d").unwrap();
        gun.retarget(&mut url).unwrap();
        assert_eq!(url.as_str(), "https://127.0.0.1:9000/a/b?c=d");
    }

    #[test]
    fn request_size_counts_line_headers_and_body() {
        let mut req = Request::new(Method::POST, Url::parse("http://h/up?x=1").unwrap());
        req.headers_mut().insert("a", "bc".parse().unwrap());
        *req.body_mut() = Some(b"12345".to_vec().into());
        // "POST /up?x=1 HTTP/1.1\r\n" + "a: bc\r\n" + "\r\n" + body
        assert_eq!(request_size(&req), 23 + 7 + 2 + 5);
    }
}
