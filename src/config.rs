//! Engine configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Engine-wide settings, loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Timeout applied to cases that declare none
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Retry count applied to cases that declare none
    #[serde(default)]
    pub default_retries: u32,

    /// Fixed delay between attempts of one case
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Also retry attempts whose assertions failed
    #[serde(default = "default_true")]
    pub retry_on_assertion_failure: bool,

    /// How long a finished run stays in the execution store
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Report database; in-memory when absent
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub transport: TransportSettings,
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            retry_on_assertion_failure: true,
            retention_secs: default_retention_secs(),
            database_path: None,
            transport: TransportSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            verify_ssl: true,
            proxy_url: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_retention_secs() -> u64 {
    3_600
}
fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("suiterun/{}", env!("CARGO_PKG_VERSION"))
}

impl EngineSettings {
    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no engine config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
