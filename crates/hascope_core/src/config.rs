//! Configuration for hascope.
//!
//! Loaded from a TOML file (default `~/.config/hascope/config.toml`,
//! overridable via `HASCOPE_CONFIG`). Everything downstream receives an
//! explicit context built from this; there is no process-wide singleton.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::schema::{Engine, SchemaEra};

/// Environment variable overriding the config file path.
pub const CONFIG_ENV: &str = "HASCOPE_CONFIG";

/// Recorder database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (sqlite:///path, mysql://user:pw@host/db, postgresql://...).
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-query and pool-acquisition time budget.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Physical schema era; modern recorder databases are normalized.
    #[serde(default = "default_schema_era")]
    pub schema_era: String,
}

/// Live API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Home Assistant base URL (e.g. http://homeassistant.local:8123).
    pub url: String,

    /// Long-lived access token.
    pub access_token: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Correlation policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Half-width of the correlation window, minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_schema_era() -> String {
    "normalized-meta".to_string()
}

fn default_window_minutes() -> i64 {
    10
}

fn default_max_events() -> usize {
    20
}

fn default_max_results() -> usize {
    10
}

fn default_ha_config_path() -> String {
    "/config".to_string()
}

fn default_batch_concurrency() -> usize {
    10
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            window_minutes: default_window_minutes(),
            max_events: default_max_events(),
            max_results: default_max_results(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HascopeConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,

    /// Home Assistant config directory (log files, .storage registry).
    #[serde(default = "default_ha_config_path")]
    pub ha_config_path: String,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Concurrency cap for per-entity fan-out in batch operations.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl HascopeConfig {
    /// Resolve the config file path: env override, then the user config dir.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".config").join("hascope").join("config.toml")
    }

    /// Load and validate configuration from a TOML file.
    pub fn load_from(path: &Path) -> CoreResult<HascopeConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: HascopeConfig = toml::from_str(&text)
            .map_err(|e| CoreError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> CoreResult<HascopeConfig> {
        Self::load_from(&Self::default_path())
    }

    fn validate(&self) -> CoreResult<()> {
        // Fails on unsupported URL schemes.
        let _ = self.engine()?;
        let _ = self.schema_era()?;
        if self.api.url.is_empty() {
            return Err(CoreError::Config("api.url is required".to_string()));
        }
        if self.correlation.window_minutes <= 0 {
            return Err(CoreError::Config(
                "correlation.window_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine(&self) -> CoreResult<Engine> {
        Engine::from_url(&self.database.url)
    }

    pub fn schema_era(&self) -> CoreResult<SchemaEra> {
        match self.database.schema_era.as_str() {
            "legacy-flat" => Ok(SchemaEra::LegacyFlat),
            "normalized-meta" => Ok(SchemaEra::NormalizedMeta),
            other => Err(CoreError::Config(format!(
                "unknown schema era '{}': use legacy-flat or normalized-meta",
                other
            ))),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.database.timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
