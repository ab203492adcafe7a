use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::model::Instance;
use crate::registry::CollectorBundle;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (scores older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./dbvitals.db")
}

fn default_retention_days() -> u32 {
    90
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between two due checks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    5
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Allow cross-origin requests from any origin
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_enable_cors() -> bool {
    true
}

/// Agent the HTTP probe forwards calls to
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    pub url: String,
    pub token: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Storage configuration (defaults to SQLite)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiSettings,

    pub probe: ProbeConfig,

    #[serde(default)]
    pub instances: Vec<Instance>,

    /// Seed collectors, written only when absent from storage
    #[serde(default)]
    pub collectors: Vec<CollectorBundle>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<HubConfig> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<HubConfig> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
