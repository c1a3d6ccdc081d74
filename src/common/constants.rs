/// Source name constants to ensure consistency across adapters, logs and metrics.
/// These are the names that appear in batch summaries and the `provider` config keys.

// Tide providers
pub const NOAA_SOURCE: &str = "noaa";
pub const STORMGLASS_SOURCE: &str = "stormglass";

// Almanac providers
pub const USNO_SOURCE: &str = "usno";
pub const ALMANAC_TABLE_SOURCE: &str = "table";

// Default endpoints
pub const NOAA_DEFAULT_BASE_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";
pub const STORMGLASS_DEFAULT_BASE_URL: &str = "https://api.stormglass.io/v2/tide/sea-level/point";
pub const USNO_DEFAULT_BASE_URL: &str = "https://aa.usno.navy.mil/api/rstt/oneday";

/// Application name sent to providers that ask for one (NOAA `application=`).
pub const APPLICATION_NAME: &str = "earth_data";

/// Canonical unit for every height the pipeline persists.
pub const CANONICAL_HEIGHT_UNIT: &str = "m";

// Configuration defaults
pub const DEFAULT_CONFIG_PATH: &str = "earth-data.toml";
pub const CONFIG_PATH_ENV: &str = "EARTH_DATA_CONFIG";
pub const METRICS_PORT_ENV: &str = "EARTH_DATA_METRICS_PORT";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Get all supported tide provider names
pub fn supported_tide_sources() -> Vec<&'static str> {
    vec![NOAA_SOURCE, STORMGLASS_SOURCE]
}

/// Get all supported almanac provider names
pub fn supported_almanac_sources() -> Vec<&'static str> {
    vec![USNO_SOURCE, ALMANAC_TABLE_SOURCE]
}
