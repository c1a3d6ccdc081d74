use super::TideSource;
use crate::common::constants::{APPLICATION_NAME, NOAA_SOURCE};
use crate::common::error::{PipelineError, Result};
use crate::common::types::{RawTideObservation, TimeRange};
use crate::config::{LocationConfig, TideConfig};
use crate::infra::http_client::HttpFetcher;
use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;
use tracing::{debug, instrument};

/// NOAA CO-OPS tide predictions (`datagetter`, `product=predictions`).
pub struct NoaaTides {
    http: HttpFetcher,
    base_url: String,
    units: String,
    datum: String,
    time_zone: String,
    interval: String,
}

impl NoaaTides {
    pub fn from_config(config: &TideConfig) -> Result<Self> {
        let units = config.units.to_ascii_lowercase();
        if units != "metric" && units != "english" {
            return Err(PipelineError::Config(format!(
                "NOAA units must be 'metric' or 'english', got '{}'",
                config.units
            )));
        }
        Ok(Self {
            http: HttpFetcher::new(NOAA_SOURCE, config.timeout())?,
            base_url: config.base_url().to_string(),
            units,
            datum: config.datum.clone(),
            time_zone: config.time_zone.to_ascii_lowercase(),
            interval: config.interval.clone(),
        })
    }

    fn query(&self, station: &str, range: &TimeRange) -> Vec<(&'static str, String)> {
        // Dates are inclusive on NOAA's side; the range end is exclusive
        let last = range.end - Duration::seconds(1);
        let last = if last < range.start { range.start } else { last };
        vec![
            ("product", "predictions".to_string()),
            ("application", APPLICATION_NAME.to_string()),
            ("begin_date", range.start.format("%Y%m%d").to_string()),
            ("end_date", last.format("%Y%m%d").to_string()),
            ("station", station.to_string()),
            ("datum", self.datum.clone()),
            ("units", self.units.clone()),
            ("time_zone", self.time_zone.clone()),
            ("interval", self.interval.clone()),
            ("format", "json".to_string()),
        ]
    }
}

/// Turn a `datagetter` predictions body into raw observations.
///
/// `gmt` times are marked as UTC. Station-local (`lst_ldt`) times are left
/// naive for the normalizer to place, so the two readings of a repeated
/// fall-back hour resolve to the same instant. Any entry that does not parse fails the whole
/// response, since a partial series cannot be told apart from a short one.
pub fn parse_predictions(
    body: &Value,
    station: &str,
    units: &str,
    time_zone: &str,
) -> Result<Vec<RawTideObservation>> {
    if let Some(err) = body.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(PipelineError::malformed(NOAA_SOURCE, message));
    }
    let predictions = body
        .get("predictions")
        .and_then(|p| p.as_array())
        .ok_or_else(|| PipelineError::malformed(NOAA_SOURCE, "missing 'predictions' array"))?;

    let unit = if units.eq_ignore_ascii_case("english") { "ft" } else { "m" };
    let gmt = time_zone.eq_ignore_ascii_case("gmt");

    predictions
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let t = entry
                .get("t")
                .and_then(|t| t.as_str())
                .ok_or_else(|| PipelineError::malformed(NOAA_SOURCE, format!("prediction {} has no 't'", i)))?;
            let height = match entry.get("v") {
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                Some(Value::Number(n)) => n.as_f64(),
                _ => None,
            }
            .ok_or_else(|| PipelineError::malformed(NOAA_SOURCE, format!("prediction {} has no numeric 'v'", i)))?;
            let timestamp = if gmt { format!("{}Z", t.trim()) } else { t.trim().to_string() };
            Ok(RawTideObservation {
                location: station.to_string(),
                timestamp,
                height,
                unit: unit.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl TideSource for NoaaTides {
    fn source_name(&self) -> &'static str {
        NOAA_SOURCE
    }

    #[instrument(skip(self, location), fields(station = location.tide_id()))]
    async fn fetch_tides(
        &self,
        location: &LocationConfig,
        range: &TimeRange,
    ) -> Result<Vec<RawTideObservation>> {
        let station = location.tide_id();
        let body = self
            .http
            .get_json(&self.base_url, &self.query(station, range), None)
            .await?;
        let observations = parse_predictions(&body, station, &self.units, &self.time_zone)?;
        debug!(count = observations.len(), "Fetched NOAA predictions");
        Ok(observations)
    }
}
