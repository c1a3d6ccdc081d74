use crate::common::constants::{
    supported_almanac_sources, supported_tide_sources, ALMANAC_TABLE_SOURCE, CONFIG_PATH_ENV,
    DEFAULT_CONFIG_PATH, DEFAULT_TIMEOUT_SECS, NOAA_DEFAULT_BASE_URL, STORMGLASS_DEFAULT_BASE_URL,
    STORMGLASS_SOURCE, USNO_DEFAULT_BASE_URL,
};
use crate::common::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tide: TideConfig,
    pub almanac: AlmanacConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TideConfig {
    /// `noaa` or `stormglass`
    pub provider: String,
    pub base_url: Option<String>,
    /// NOAA `units`: `metric` or `english`
    #[serde(default = "default_noaa_units")]
    pub units: String,
    /// NOAA `datum`, e.g. `MLLW` or `MSL`
    #[serde(default = "default_datum")]
    pub datum: String,
    /// NOAA `time_zone`: `gmt` or `lst_ldt` (station local). Station-local
    /// series repeat the fall-back hour, and the repeated readings land on
    /// the earlier instant.
    #[serde(default = "default_noaa_time_zone")]
    pub time_zone: String,
    /// NOAA `interval`: `h`, `6`, or `hilo`
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Name of the environment variable holding the provider API key
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlmanacConfig {
    /// `usno` or `table`
    pub provider: String,
    pub base_url: Option<String>,
    /// Table file path; `{id}` is replaced with the location's almanac id
    pub table_path: Option<String>,
    /// Zone the table's local times are written in (IANA name or fixed offset)
    pub table_timezone: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// What a second write of an existing record key does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The second write is a no-op
    KeepExisting,
    /// The second write replaces the stored value
    Overwrite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_duplicate_policy")]
    pub on_duplicate: DuplicatePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Number of days fetched per batch
    #[serde(default = "default_days")]
    pub days: u32,
    /// Offset of the first day from today (UTC); negative looks back
    #[serde(default)]
    pub start_offset_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    /// Emit console logs as JSON instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

/// One place the installation cares about, with the ids each provider knows it by.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Canonical location key used in every normalized record
    pub key: String,
    pub tide_station: Option<String>,
    pub almanac_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// IANA zone used when a provider reports naive local times
    pub timezone: Option<String>,
}

impl LocationConfig {
    pub fn tide_id(&self) -> &str {
        self.tide_station.as_deref().unwrap_or(&self.key)
    }

    pub fn almanac_id(&self) -> &str {
        self.almanac_id.as_deref().unwrap_or(&self.key)
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

fn default_noaa_units() -> String {
    "metric".to_string()
}

fn default_datum() -> String {
    "MLLW".to_string()
}

fn default_noaa_time_zone() -> String {
    "gmt".to_string()
}

fn default_interval() -> String {
    "h".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/earth_data.db")
}

fn default_duplicate_policy() -> DuplicatePolicy {
    DuplicatePolicy::KeepExisting
}

fn default_days() -> u32 {
    2
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "earth_data.log".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            on_duplicate: default_duplicate_policy(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            start_offset_days: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_prefix: default_log_prefix(),
            json: false,
        }
    }
}

impl TideConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        match (self.base_url.as_deref(), self.provider.as_str()) {
            (Some(url), _) => url,
            (None, STORMGLASS_SOURCE) => STORMGLASS_DEFAULT_BASE_URL,
            (None, _) => NOAA_DEFAULT_BASE_URL,
        }
    }
}

impl AlmanacConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(USNO_DEFAULT_BASE_URL)
    }
}

impl Config {
    /// Resolve the config path: explicit argument, then `EARTH_DATA_CONFIG`, then the default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(explicit);
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !supported_tide_sources().contains(&self.tide.provider.as_str()) {
            return Err(PipelineError::Config(format!(
                "unknown tide provider '{}'",
                self.tide.provider
            )));
        }
        if !supported_almanac_sources().contains(&self.almanac.provider.as_str()) {
            return Err(PipelineError::Config(format!(
                "unknown almanac provider '{}'",
                self.almanac.provider
            )));
        }
        if self.almanac.provider == ALMANAC_TABLE_SOURCE && self.almanac.table_path.is_none() {
            return Err(PipelineError::Config(
                "almanac provider 'table' requires table_path".into(),
            ));
        }
        if self.batch.days == 0 {
            return Err(PipelineError::Config("batch.days must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for loc in &self.locations {
            if loc.key.trim().is_empty() {
                return Err(PipelineError::Config("location key must not be empty".into()));
            }
            if !seen.insert(loc.key.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate location key '{}'",
                    loc.key
                )));
            }
        }
        Ok(())
    }

    pub fn location(&self, key: &str) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.key == key)
    }
}
