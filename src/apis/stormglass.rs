use super::TideSource;
use crate::common::constants::STORMGLASS_SOURCE;
use crate::common::error::{PipelineError, Result};
use crate::common::types::{RawTideObservation, TimeRange};
use crate::config::{LocationConfig, TideConfig};
use crate::infra::http_client::HttpFetcher;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

/// Stormglass sea-level point API. Heights are meters relative to the returned datum.
pub struct StormglassTides {
    http: HttpFetcher,
    base_url: String,
    api_key_env: Option<String>,
}

impl StormglassTides {
    pub fn from_config(config: &TideConfig) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(STORMGLASS_SOURCE, config.timeout())?,
            base_url: config.base_url().to_string(),
            api_key_env: config.api_key_env.clone(),
        })
    }

    /// Key is read per call so a rotated key is picked up without a restart.
    fn api_key(&self) -> Result<String> {
        let var = self
            .api_key_env
            .as_deref()
            .ok_or_else(|| PipelineError::auth(STORMGLASS_SOURCE, "tide.api_key_env is not set"))?;
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(PipelineError::auth(
                STORMGLASS_SOURCE,
                format!("environment variable {} holds no API key", var),
            )),
        }
    }
}

pub fn parse_sea_level(body: &Value, location: &str) -> Result<Vec<RawTideObservation>> {
    if let Some(errors) = body.get("errors") {
        let message = errors.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("key") || lowered.contains("quota") {
            return Err(PipelineError::auth(STORMGLASS_SOURCE, message));
        }
        return Err(PipelineError::malformed(STORMGLASS_SOURCE, message));
    }
    let data = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| PipelineError::malformed(STORMGLASS_SOURCE, "missing 'data' array"))?;

    data.iter()
        .enumerate()
        .map(|(i, entry)| {
            let time = entry.get("time").and_then(|t| t.as_str()).ok_or_else(|| {
                PipelineError::malformed(STORMGLASS_SOURCE, format!("entry {} has no 'time'", i))
            })?;
            let height = entry.get("sg").and_then(|v| v.as_f64()).ok_or_else(|| {
                PipelineError::malformed(STORMGLASS_SOURCE, format!("entry {} has no numeric 'sg'", i))
            })?;
            Ok(RawTideObservation {
                location: location.to_string(),
                timestamp: time.to_string(),
                height,
                unit: "m".to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl TideSource for StormglassTides {
    fn source_name(&self) -> &'static str {
        STORMGLASS_SOURCE
    }

    #[instrument(skip(self, location), fields(location = %location.key))]
    async fn fetch_tides(
        &self,
        location: &LocationConfig,
        range: &TimeRange,
    ) -> Result<Vec<RawTideObservation>> {
        let (lat, lng) = location.coordinates().ok_or_else(|| {
            PipelineError::Config(format!(
                "location '{}' needs latitude and longitude for {}",
                location.key, STORMGLASS_SOURCE
            ))
        })?;
        let key = self.api_key()?;
        let query = vec![
            ("lat", lat.to_string()),
            ("lng", lng.to_string()),
            ("start", range.start.timestamp().to_string()),
            ("end", range.end.timestamp().to_string()),
        ];
        let body = self.http.get_json(&self.base_url, &query, Some(&key)).await?;
        let observations = parse_sea_level(&body, location.tide_id())?;
        debug!(count = observations.len(), "Fetched sea-level series");
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sea_level_points() {
        let body = json!({
            "data": [
                {"sg": 0.38, "time": "2024-06-01T00:00:00+00:00"},
                {"sg": -0.12, "time": "2024-06-01T01:00:00+00:00"}
            ],
            "meta": {"datum": "MSL", "station": {"name": "phoenix"}}
        });
        let obs = parse_sea_level(&body, "phoenix").unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].height, -0.12);
        assert_eq!(obs[1].timestamp, "2024-06-01T01:00:00+00:00");
        assert_eq!(obs[1].unit, "m");
    }

    #[test]
    fn test_quota_error_body_is_authentication_error() {
        let body = json!({"errors": {"key": "API quota exceeded"}});
        assert!(matches!(
            parse_sea_level(&body, "phoenix"),
            Err(PipelineError::AuthenticationError { .. })
        ));
    }

    #[test]
    fn test_missing_height_is_malformed() {
        let body = json!({"data": [{"time": "2024-06-01T00:00:00+00:00"}]});
        assert!(matches!(
            parse_sea_level(&body, "phoenix"),
            Err(PipelineError::MalformedResponse { .. })
        ));
    }
}
