use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use log::{debug, warn};
use serde::Deserialize;

use crate::stats::sysctl::BPF_STATS_SYSCTL;

const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

/// Stats collection configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct StatsSettings {
    /// Legacy accounting flag, normally `/proc/sys/kernel/bpf_stats_enabled`.
    pub sysctl_path: Option<String>,
    pub sample_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct Settings {
    #[serde(default)]
    pub stats: StatsSettings,
}

impl Settings {
    /// Loads `.env`, then `BPFBENCH_*` environment variables, e.g.
    /// `BPFBENCH_STATS__SAMPLE_INTERVAL_MS=500`.
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let s = Config::builder()
            .add_source(
                Environment::with_prefix("BPFBENCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = s.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    pub fn sysctl_path(&self) -> PathBuf {
        self.stats
            .sysctl_path
            .as_deref()
            .unwrap_or(BPF_STATS_SYSCTL)
            .into()
    }

    pub fn sample_interval(&self) -> Duration {
        match self.stats.sample_interval_ms {
            Some(0) => {
                warn!(
                    "sample_interval_ms must be positive; using {}ms",
                    DEFAULT_SAMPLE_INTERVAL_MS
                );
                Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS)
            }
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
        }
    }
}
