use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::job_runner::JobPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/voltback/config.toml";
pub const ENV_PREFIX: &str = "VOLTBACK_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Probe the environment.
    Auto,
    Cattle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub kind: PlatformKind,
    /// Base url of the platform API, e.g. `http://rancher:8080/v2-beta/projects/1a5`.
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub metadata_url: String,
    pub request_timeout_secs: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            kind: PlatformKind::Auto,
            url: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            metadata_url: "http://rancher-metadata/latest".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Backup tool target, e.g. `s3://s3.amazonaws.com/bucket`.
    pub target_url: String,
    /// Used in the destination path when a volume's host name is unknown.
    pub hostname: String,
    pub image: String,
    pub full_if_older_than: String,
    pub remove_older_than: String,
    /// `name:path` bind of the volume holding the backup tool's cache.
    pub cache_volume: String,
    pub label_prefix: String,
    /// Volume pipelines allowed to run at once.
    pub concurrency: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            hostname: String::new(),
            image: "camptocamp/duplicity:latest".to_string(),
            full_if_older_than: "15D".to_string(),
            remove_older_than: "30D".to_string(),
            cache_volume: "duplicity_cache:/root/.cache/duplicity".to_string(),
            label_prefix: "io.voltback".to_string(),
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub poll_interval_ms: u64,
    pub grace_period_secs: u64,
    /// 0 disables the deadline.
    pub timeout_secs: u64,
    pub teardown_timeout_secs: u64,
    pub tunnel_timeout_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            grace_period_secs: 5,
            timeout_secs: 4 * 3600,
            teardown_timeout_secs: 120,
            tunnel_timeout_secs: 600,
        }
    }
}

impl JobSettings {
    pub fn policy(&self) -> JobPolicy {
        JobPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            grace_period: Duration::from_secs(self.grace_period_secs),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            teardown_timeout: Duration::from_secs(self.teardown_timeout_secs),
        }
    }

    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub push_gateway_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub json: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub platform: PlatformSettings,
    pub backup: BackupSettings,
    pub volumes: VolumeSettings,
    pub jobs: JobSettings,
    pub metrics: MetricsSettings,
    pub log: LogSettings,
}

impl AppConfig {
    /// Defaults, then the TOML file, then `VOLTBACK_*` variables, then CLI overrides.
    ///
    /// Nested keys use `__` in variable names: `VOLTBACK_PLATFORM__URL`.
    pub fn new<T: Serialize>(config_path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        Self::figment(config_path, overrides)
            .extract()
            .context("Failed to load configuration")
    }

    pub fn figment<T: Serialize>(config_path: Option<&Path>, overrides: Option<&T>) -> Figment {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
    }
}
