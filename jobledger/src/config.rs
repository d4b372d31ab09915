use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

const CONFIG_FILE: &str = "jobledger.yaml";
const ENV_PREFIX: &str = "JOBLEDGER_";

/// Repository settings, read once at startup.
///
/// Sources, later ones winning: built-in defaults, `jobledger.yaml` in the
/// working directory, then `JOBLEDGER_*` environment variables. Nested keys
/// use a double underscore, e.g. `JOBLEDGER_RETENTION__WINDOW_SECS`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `postgres` or `sqlite`. Unset or unrecognised selects `sqlite`.
    pub engine: Option<String>,
    /// Required when the Postgres engine is selected.
    pub database_url: Option<String>,
    pub sqlite_url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
    pub retention: RetentionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: None,
            database_url: None,
            sqlite_url: "sqlite://jobledger.db".to_string(),
            max_connections: 5,
            run_migrations: true,
            retention: RetentionSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// How long completed jobs are kept.
    pub window_secs: u64,
    /// How often the sweeper runs.
    pub interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            window_secs: 7 * 24 * 60 * 60,
            interval_secs: 60 * 60,
        }
    }
}

impl RetentionSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Settings {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}
