//! Layered configuration: built-in defaults, then `songgen.toml` (or an
//! explicit `--config` file), then `SONGGEN_*` environment variables, then
//! command-line overrides.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::core::tracker::Cadence;

pub const CONFIG_FILE: &str = "songgen.toml";
pub const ENV_PREFIX: &str = "SONGGEN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    /// Per-request timeout. Unset leaves requests unbounded.
    pub request_timeout_secs: Option<u64>,
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub queue_wait_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Download the recommended model on start when nothing is ready.
    pub auto_download: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: None,
            tick_interval_ms: 1000,
            poll_interval_ms: 2000,
            queue_wait_interval_ms: 1000,
            sweep_interval_ms: 10_000,
            auto_download: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load from `songgen.toml` in the working directory.
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self, figment::Error> {
        Self::load(None, overrides)
    }

    /// Load from `path` (or `songgen.toml`), the environment and `overrides`.
    pub fn load<T: Serialize>(
        path: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, figment::Error> {
        let file = path.unwrap_or_else(|| Path::new(CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment.extract()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            tick: Duration::from_millis(self.tick_interval_ms.max(1)),
            poll: Duration::from_millis(self.poll_interval_ms.max(1)),
            queue_wait: Duration::from_millis(self.queue_wait_interval_ms.max(1)),
            sweep: Duration::from_millis(self.sweep_interval_ms.max(1)),
        }
    }
}
