pub mod almanac_table;
pub mod noaa;
pub mod stormglass;
pub mod usno;

use crate::common::constants::{ALMANAC_TABLE_SOURCE, NOAA_SOURCE, STORMGLASS_SOURCE, USNO_SOURCE};
use crate::common::error::{PipelineError, Result};
use crate::common::types::{DateSpan, RawAstronomicalEvent, RawTideObservation, TimeRange};
use crate::config::{AlmanacConfig, LocationConfig, TideConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// A remote provider of tide heights.
///
/// One bounded attempt per call; retry policy belongs to whoever schedules batches.
#[async_trait]
pub trait TideSource: Send + Sync {
    /// Name used in logs, metrics and batch summaries
    fn source_name(&self) -> &'static str;

    async fn fetch_tides(
        &self,
        location: &LocationConfig,
        range: &TimeRange,
    ) -> Result<Vec<RawTideObservation>>;
}

/// A provider of sunrise and sunset times.
#[async_trait]
pub trait AstronomicalSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_events(
        &self,
        location: &LocationConfig,
        dates: &DateSpan,
    ) -> Result<Vec<RawAstronomicalEvent>>;
}

pub fn tide_source_from_config(config: &TideConfig) -> Result<Arc<dyn TideSource>> {
    let source: Arc<dyn TideSource> = match config.provider.as_str() {
        NOAA_SOURCE => Arc::new(noaa::NoaaTides::from_config(config)?),
        STORMGLASS_SOURCE => Arc::new(stormglass::StormglassTides::from_config(config)?),
        other => {
            return Err(PipelineError::Config(format!(
                "unknown tide provider '{}'",
                other
            )))
        }
    };
    Ok(source)
}

pub fn almanac_source_from_config(config: &AlmanacConfig) -> Result<Arc<dyn AstronomicalSource>> {
    let source: Arc<dyn AstronomicalSource> = match config.provider.as_str() {
        USNO_SOURCE => Arc::new(usno::UsnoAlmanac::from_config(config)?),
        ALMANAC_TABLE_SOURCE => Arc::new(almanac_table::AlmanacTable::from_config(config)?),
        other => {
            return Err(PipelineError::Config(format!(
                "unknown almanac provider '{}'",
                other
            )))
        }
    };
    Ok(source)
}
