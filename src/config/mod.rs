//! JSON configuration of a shoot.
//!
//! ```json
//! {
//!   "pools": [{
//!     "id": "api",
//!     "gun":     { "type": "http", "target": "localhost:8080" },
//!     "ammo":    { "type": "uri", "file": "./ammo.uri", "passes": 1 },
//!     "result":  { "type": "phout", "destination": "./phout.log" },
//!     "rps":     { "type": "linear", "start-rps": 10, "end-rps": 100, "duration": "30s" },
//!     "startup": { "type": "once", "times": 20 }
//!   }]
//! }
//! ```
//!
//! Every plugin is `{"type": <name>, ...params}`; the [`Registry`] turns
//! it into a component.

pub mod registry;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub use registry::Registry;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GlobalConfig {
    pub pools: Vec<PoolConfig>,
}

impl GlobalConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|source| Error::ConfigParse {
            family: "global",
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PoolConfig {
    /// Generated when missing.
    #[serde(default)]
    pub id: Option<String>,
    pub gun: PluginSpec,
    pub ammo: PluginSpec,
    pub result: PluginSpec,
    /// Schedule of each user, or of all users with `shared-schedule`.
    pub rps: PluginSpec,
    /// Schedule starting the users, one per tick.
    pub startup: PluginSpec,
    #[serde(default)]
    pub shared_schedule: bool,
}

/// A plugin name plus its not yet interpreted parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl PluginSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Parses the parameters into the plugin's typed config.
    pub fn params<T: DeserializeOwned>(&self, family: &'static str) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|source| Error::ConfigParse { family, source })
    }
}

/// Plugins without parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

// ─── Duration fields ─────────────────────────────────────────────

/// `deserialize_with` helper for humantime durations (`"1s"`, `"250ms"`).
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

pub mod opt_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
