use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{duration, GlobalConfig, NoParams, PluginSpec, PoolConfig};
use crate::aggregate::{
    Aggregator, AggregatorRegistry, DiscardAggregator, LogAggregator, SummaryAggregator,
    DEFAULT_SINK_BUFFER,
};
use crate::ammo::{
    AmmoKind, AmmoSource, FileSettings, JsonLineDecoder, JsonLineProvider, LogProvider, Provider,
    UriBodyDecoder, UriBodyProvider, UriListDecoder, UriListProvider, DEFAULT_AMMO_BUFFER,
};
use crate::engine::{Engine, GunFactory, ScheduleFactory, UserPool};
use crate::error::{Error, Result};
use crate::gun::{Gun, HttpGun, HttpGunConfig, LogGun};
use crate::schedule::{self, Batch, Composite, Linear, Schedule, Size, Unlimited};

type GunBuilder = Arc<dyn Fn(&PluginSpec) -> Result<GunFactory> + Send + Sync>;
type ProviderBuilder = Arc<dyn Fn(&PluginSpec) -> Result<Arc<dyn Provider>> + Send + Sync>;
type AggregatorBuilder =
    Arc<dyn Fn(&PluginSpec, &AggregatorRegistry) -> Result<Arc<dyn Aggregator>> + Send + Sync>;
type ScheduleBuilder = Arc<dyn Fn(&PluginSpec, &Registry) -> Result<ScheduleFactory> + Send + Sync>;

struct GunEntry {
    accepts: &'static [AmmoKind],
    build: GunBuilder,
}

/// Name → factory maps, one per plugin family.
///
/// [`Registry::new`] comes with every built-in plugin; more can be added
/// with the `register_*` methods before [`Registry::build`].
pub struct Registry {
    guns: HashMap<String, GunEntry>,
    providers: HashMap<String, ProviderBuilder>,
    aggregators: HashMap<String, AggregatorBuilder>,
    schedules: HashMap<String, ScheduleBuilder>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry without any plugin.
    pub fn empty() -> Self {
        Self {
            guns: HashMap::new(),
            providers: HashMap::new(),
            aggregators: HashMap::new(),
            schedules: HashMap::new(),
        }
    }

    /// Registry with the built-in plugins.
    pub fn new() -> Self {
        let mut r = Self::empty();
        register_guns(&mut r);
        register_providers(&mut r);
        register_aggregators(&mut r);
        register_schedules(&mut r);
        r
    }

    // ── Registration ────────────────────────────────────────────

    pub fn register_gun<F>(&mut self, name: &str, accepts: &'static [AmmoKind], build: F)
    where
        F: Fn(&PluginSpec) -> Result<GunFactory> + Send + Sync + 'static,
    {
        self.guns.insert(
            name.to_owned(),
            GunEntry {
                accepts,
                build: Arc::new(build),
            },
        );
    }

    pub fn register_provider<F>(&mut self, name: &str, build: F)
    where
        F: Fn(&PluginSpec) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.providers.insert(name.to_owned(), Arc::new(build));
    }

    pub fn register_aggregator<F>(&mut self, name: &str, build: F)
    where
        F: Fn(&PluginSpec, &AggregatorRegistry) -> Result<Arc<dyn Aggregator>> + Send + Sync + 'static,
    {
        self.aggregators.insert(name.to_owned(), Arc::new(build));
    }

    pub fn register_schedule<F>(&mut self, name: &str, build: F)
    where
        F: Fn(&PluginSpec, &Registry) -> Result<ScheduleFactory> + Send + Sync + 'static,
    {
        self.schedules.insert(name.to_owned(), Arc::new(build));
    }

    // ── Lookup ──────────────────────────────────────────────────

    /// Gun factory for `spec` and the ammo kinds the gun can fire.
    pub fn gun(&self, spec: &PluginSpec) -> Result<(GunFactory, &'static [AmmoKind])> {
        let entry = self.guns.get(&spec.kind).ok_or_else(|| unknown("gun", spec))?;
        let factory = (entry.build)(spec)?;
        // Surface target and transport errors now rather than per user.
        drop(factory()?);
        Ok((factory, entry.accepts))
    }

    pub fn provider(&self, spec: &PluginSpec) -> Result<Arc<dyn Provider>> {
        let build = self.providers.get(&spec.kind).ok_or_else(|| unknown("ammo", spec))?;
        build(spec)
    }

    pub fn aggregator(&self, spec: &PluginSpec, shared: &AggregatorRegistry) -> Result<Arc<dyn Aggregator>> {
        let build = self.aggregators.get(&spec.kind).ok_or_else(|| unknown("result", spec))?;
        build(spec, shared)
    }

    pub fn schedule(&self, spec: &PluginSpec) -> Result<ScheduleFactory> {
        let build = self.schedules.get(&spec.kind).ok_or_else(|| unknown("schedule", spec))?;
        let factory = build(spec, self)?;
        drop(factory()?);
        Ok(factory)
    }

    // ── Wiring ──────────────────────────────────────────────────

    /// Turns a parsed config into a ready engine. Every config error
    /// surfaces here, before any task runs.
    pub fn build(&self, config: &GlobalConfig) -> Result<Engine> {
        if config.pools.is_empty() {
            return Err(Error::Config("no pools configured".into()));
        }
        let shared = AggregatorRegistry::new();
        let pools = config
            .pools
            .iter()
            .map(|pool| self.pool(pool, &shared))
            .collect::<Result<Vec<_>>>()?;
        Ok(Engine::new(pools))
    }

    fn pool(&self, cfg: &PoolConfig, shared: &AggregatorRegistry) -> Result<UserPool> {
        let id = cfg.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let in_pool = |err: Error| match err {
            Error::Config(msg) => Error::Config(format!("pool {id}: {msg}")),
            other => other,
        };

        let (gun, accepts) = self.gun(&cfg.gun).map_err(in_pool)?;
        let provider = self.provider(&cfg.ammo).map_err(in_pool)?;
        if !accepts.contains(&provider.kind()) {
            return Err(in_pool(Error::Config(format!(
                "{} gun cannot fire {} ammo",
                cfg.gun.kind,
                provider.kind()
            ))));
        }
        let aggregator = self.aggregator(&cfg.result, shared).map_err(in_pool)?;
        let schedule = self.schedule(&cfg.rps).map_err(in_pool)?;
        let startup = self.schedule(&cfg.startup).map_err(in_pool)?;

        info!(
            pool = %id,
            gun = %cfg.gun.kind,
            ammo = %cfg.ammo.kind,
            result = %cfg.result.kind,
            rps = %cfg.rps.kind,
            startup = %cfg.startup.kind,
            "pool configured"
        );
        Ok(UserPool {
            id,
            gun,
            provider,
            aggregator,
            schedule,
            startup,
            shared_schedule: cfg.shared_schedule,
        })
    }
}

fn unknown(family: &'static str, spec: &PluginSpec) -> Error {
    Error::UnknownPlugin {
        family,
        name: spec.kind.clone(),
    }
}

// ─── Guns ────────────────────────────────────────────────────────

fn register_guns(r: &mut Registry) {
    r.register_gun("log", &[AmmoKind::Log, AmmoKind::Http], |spec| {
        spec.params::<NoParams>("gun")?;
        let factory: GunFactory = Arc::new(|| Ok(Box::new(LogGun::new()) as Box<dyn Gun>));
        Ok(factory)
    });
    r.register_gun("http", &[AmmoKind::Http], |spec| {
        let cfg: HttpGunConfig = spec.params("gun")?;
        cfg.host_port()?;
        let factory: GunFactory = Arc::new(move || Ok(Box::new(HttpGun::new(&cfg)?) as Box<dyn Gun>));
        Ok(factory)
    });
}

// ─── Ammo ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct LogAmmoParams {
    #[serde(default = "default_log_limit")]
    limit: u64,
    #[serde(default)]
    chan_size: Option<usize>,
}

fn default_log_limit() -> u64 {
    16
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileAmmoParams {
    file: PathBuf,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    passes: u64,
    #[serde(default)]
    chan_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct UriAmmoParams {
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    uris: Option<Vec<String>>,
    /// Initial sticky headers, as `[Name: Value]` lines.
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    passes: u64,
    #[serde(default)]
    chan_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct UriPostAmmoParams {
    file: PathBuf,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    passes: u64,
    #[serde(default)]
    chan_size: Option<usize>,
}

fn settings(limit: u64, passes: u64, chan_size: Option<usize>) -> FileSettings {
    FileSettings {
        limit,
        passes,
        chan_size: chan_size.unwrap_or(DEFAULT_AMMO_BUFFER),
    }
}

fn register_providers(r: &mut Registry) {
    r.register_provider("log", |spec| {
        let p: LogAmmoParams = spec.params("ammo")?;
        let provider = LogProvider::new(p.limit, p.chan_size.unwrap_or(DEFAULT_AMMO_BUFFER));
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    });
    r.register_provider("jsonline", |spec| {
        let p: FileAmmoParams = spec.params("ammo")?;
        let provider = JsonLineProvider::new(
            AmmoSource::File(p.file),
            settings(p.limit, p.passes, p.chan_size),
            JsonLineDecoder::new(),
        );
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    });
    r.register_provider("uri", |spec| {
        let p: UriAmmoParams = spec.params("ammo")?;
        let source = match (p.file, p.uris) {
            (Some(file), None) => AmmoSource::File(file),
            (None, Some(uris)) => AmmoSource::Inline(uris.join("\n").into_bytes()),
            _ => {
                return Err(Error::Config(
                    "uri ammo needs exactly one of `file` and `uris`".into(),
                ))
            }
        };
        let headers = UriListDecoder::parse_headers(&p.headers)?;
        let provider = UriListProvider::new(
            source,
            settings(p.limit, p.passes, p.chan_size),
            UriListDecoder::with_headers(headers),
        );
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    });
    r.register_provider("uripost", |spec| {
        let p: UriPostAmmoParams = spec.params("ammo")?;
        let method = match p.method.as_deref() {
            None => Method::POST,
            Some(m) => Method::from_bytes(m.as_bytes())
                .map_err(|_| Error::Config(format!("invalid http method {m:?}")))?,
        };
        let provider = UriBodyProvider::new(
            AmmoSource::File(p.file),
            settings(p.limit, p.passes, p.chan_size),
            UriBodyDecoder::new(method),
        );
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    });
}

// ─── Results ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PhoutParams {
    #[serde(default)]
    destination: String,
    #[serde(default)]
    buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct BufferParams {
    #[serde(default)]
    buffer: Option<usize>,
}

fn register_aggregators(r: &mut Registry) {
    r.register_aggregator("phout", |spec, shared| {
        let p: PhoutParams = spec.params("result")?;
        let buffer = p.buffer.unwrap_or(DEFAULT_SINK_BUFFER);
        Ok(shared.phout(&p.destination, buffer) as Arc<dyn Aggregator>)
    });
    r.register_aggregator("log", |spec, _| {
        let p: BufferParams = spec.params("result")?;
        Ok(Arc::new(LogAggregator::new(p.buffer.unwrap_or(DEFAULT_SINK_BUFFER))) as Arc<dyn Aggregator>)
    });
    r.register_aggregator("discard", |spec, _| {
        let p: BufferParams = spec.params("result")?;
        Ok(Arc::new(DiscardAggregator::new(p.buffer.unwrap_or(DEFAULT_SINK_BUFFER))) as Arc<dyn Aggregator>)
    });
    r.register_aggregator("summary", |spec, _| {
        let p: BufferParams = spec.params("result")?;
        Ok(Arc::new(SummaryAggregator::new(p.buffer.unwrap_or(DEFAULT_SINK_BUFFER))) as Arc<dyn Aggregator>)
    });
}

// ─── Schedules ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct OnceParams {
    times: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PeriodicParams {
    #[serde(deserialize_with = "duration::deserialize")]
    period: Duration,
    #[serde(default)]
    batch: Option<u64>,
    #[serde(default)]
    max: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct LinearParams {
    start_rps: f64,
    end_rps: f64,
    #[serde(deserialize_with = "duration::deserialize")]
    duration: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct SizeParams {
    size: u64,
    schedule: PluginSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct BatchParams {
    batch: u64,
    schedule: PluginSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct CompositeParams {
    steps: Vec<PluginSpec>,
}

fn schedule_factory<F>(make: F) -> ScheduleFactory
where
    F: Fn() -> Result<Box<dyn Schedule>> + Send + Sync + 'static,
{
    Arc::new(make)
}

fn register_schedules(r: &mut Registry) {
    r.register_schedule("unlimited", |spec, _| {
        spec.params::<NoParams>("schedule")?;
        Ok(schedule_factory(|| Ok(Box::new(Unlimited) as Box<dyn Schedule>)))
    });
    r.register_schedule("once", |spec, _| {
        let p: OnceParams = spec.params("schedule")?;
        Ok(schedule_factory(move || {
            Ok(Box::new(Size::new(p.times, Box::new(Unlimited))) as Box<dyn Schedule>)
        }))
    });
    r.register_schedule("periodic", |spec, _| {
        let p: PeriodicParams = spec.params("schedule")?;
        Ok(schedule_factory(move || schedule::periodic(p.period, p.batch, p.max)))
    });
    r.register_schedule("linear", |spec, _| {
        let p: LinearParams = spec.params("schedule")?;
        let ramp = Linear::new(p.start_rps, p.end_rps, p.duration)?;
        Ok(schedule_factory(move || Ok(Box::new(ramp) as Box<dyn Schedule>)))
    });
    r.register_schedule("size", |spec, registry| {
        let p: SizeParams = spec.params("schedule")?;
        let inner = registry.schedule(&p.schedule)?;
        Ok(schedule_factory(move || {
            Ok(Box::new(Size::new(p.size, inner()?)) as Box<dyn Schedule>)
        }))
    });
    r.register_schedule("batch", |spec, registry| {
        let p: BatchParams = spec.params("schedule")?;
        if p.batch == 0 {
            return Err(Error::Config("batch schedule needs a batch of at least 1".into()));
        }
        let inner = registry.schedule(&p.schedule)?;
        Ok(schedule_factory(move || {
            Ok(Box::new(Batch::new(p.batch, inner()?)) as Box<dyn Schedule>)
        }))
    });
    r.register_schedule("composite", |spec, registry| {
        let p: CompositeParams = spec.params("schedule")?;
        let steps = p
            .steps
            .iter()
            .map(|step| registry.schedule(step))
            .collect::<Result<Vec<_>>>()?;
        Ok(schedule_factory(move || {
            let built = steps.iter().map(|make| make()).collect::<Result<Vec<_>>>()?;
            Ok(Box::new(Composite::new(built)) as Box<dyn Schedule>)
        }))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_json(gun: &str, ammo: &str) -> String {
        format!(
            r#"{{"pools": [{{
                "id": "p",
                "gun": {gun},
                "ammo": {ammo},
                "result": {{"type": "discard"}},
                "rps": {{"type": "once", "times": 1}},
                "startup": {{"type": "once", "times": 1}}
            }}]}}"#
        )
    }

    fn build(json: &str) -> Result<Engine> {
        Registry::new().build(&GlobalConfig::from_json(json)?)
    }

    #[tokio::test]
    async fn builds_builtin_pool() {
        let engine = build(&pool_json(r#"{"type": "log"}"#, r#"{"type": "log", "limit": 3}"#)).unwrap();
        let pool = engine.pools().next().unwrap();
        assert_eq!(pool.id, "p");
        assert_eq!(pool.provider.kind(), AmmoKind::Log);
    }

    #[tokio::test]
    async fn unknown_plugins_are_named() {
        let err = build(&pool_json(r#"{"type": "spdy"}"#, r#"{"type": "log"}"#)).err().unwrap();
        assert!(matches!(err, Error::UnknownPlugin { family: "gun", ref name } if name == "spdy"));

        let err = Registry::new().schedule(&PluginSpec::new("sine")).err().unwrap();
        assert!(matches!(err, Error::UnknownPlugin { family: "schedule", .. }));
    }

    #[tokio::test]
    async fn gun_and_ammo_kinds_must_match() {
        let err = build(&pool_json(
            r#"{"type": "http", "target": "localhost:80"}"#,
            r#"{"type": "log"}"#,
        ))
        .err()
        .unwrap();
        match err {
            Error::Config(msg) => {
                assert!(msg.starts_with("pool p:"), "{msg}");
                assert!(msg.contains("cannot fire log ammo"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_running() {
        for (gun, ammo) in [
            (r#"{"type": "http", "target": "nowhere"}"#, r#"{"type": "uri", "uris": ["/"]}"#),
            (r#"{"type": "log", "extra": 1}"#, r#"{"type": "log"}"#),
            (r#"{"type": "log"}"#, r#"{"type": "uri"}"#),
            (r#"{"type": "log"}"#, r#"{"type": "uri", "uris": ["/"], "headers": ["oops"]}"#),
            (r#"{"type": "log"}"#, r#"{"type": "uripost", "file": "x", "method": "B A D"}"#),
        ] {
            assert!(build(&pool_json(gun, ammo)).is_err(), "{gun} {ammo}");
        }
    }

    #[tokio::test]
    async fn nested_schedules() {
        let registry = Registry::new();
        let spec: PluginSpec = serde_json::from_str(
            r#"{"type": "composite", "steps": [
                {"type": "size", "size": 2, "schedule": {"type": "unlimited"}},
                {"type": "batch", "batch": 3, "schedule": {"type": "once", "times": 1}}
            ]}"#,
        )
        .unwrap();
        let factory = registry.schedule(&spec).unwrap();

        let (rx, task) = schedule::start(factory().unwrap(), tokio_util::sync::CancellationToken::new());
        let mut ticks = 0;
        while rx.recv().await.is_ok() {
            ticks += 1;
        }
        task.await.unwrap().unwrap();
        assert_eq!(ticks, 5);
    }

    #[tokio::test]
    async fn bad_schedule_parameters() {
        let registry = Registry::new();
        for spec in [
            PluginSpec::new("periodic").with("period", "0s"),
            PluginSpec::new("periodic").with("period", "often"),
            PluginSpec::new("linear").with("start-rps", 1).with("end-rps", 2),
            PluginSpec::new("size").with("size", 1),
        ] {
            assert!(registry.schedule(&spec).is_err(), "{spec:?}");
        }

        let zero_batch = PluginSpec::new("batch")
            .with("batch", 0)
            .with("schedule", serde_json::json!({"type": "unlimited"}));
        match registry.schedule(&zero_batch) {
            Err(Error::Config(msg)) => assert!(msg.contains("at least 1"), "{msg}"),
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("batch of zero accepted"),
        }
    }

    #[tokio::test]
    async fn same_phout_destination_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("phout.log");
        let result = PluginSpec::new("phout").with("destination", out.to_string_lossy().as_ref());
        let shared = AggregatorRegistry::new();
        let registry = Registry::new();
        let a = registry.aggregator(&result, &shared).unwrap();
        let b = registry.aggregator(&result, &shared).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(shared.len(), 1);
    }
}
