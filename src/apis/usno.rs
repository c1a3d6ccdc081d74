use super::AstronomicalSource;
use crate::common::constants::USNO_SOURCE;
use crate::common::error::{PipelineError, Result};
use crate::common::types::{DateSpan, RawAstronomicalEvent};
use crate::config::{AlmanacConfig, LocationConfig};
use crate::infra::http_client::HttpFetcher;
use crate::pipeline::normalize::zone::ZoneSpec;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, instrument};

/// USNO Astronomical Applications "complete sun and moon data for one day".
pub struct UsnoAlmanac {
    http: HttpFetcher,
    base_url: String,
}

impl UsnoAlmanac {
    pub fn from_config(config: &AlmanacConfig) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(USNO_SOURCE, config.timeout())?,
            base_url: config.base_url().to_string(),
        })
    }
}

/// `-25200` → `-07:00`
pub fn format_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.unsigned_abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Hours as USNO wants them in `tz=`: `-7`, `5.5`.
fn format_hours(seconds: i32) -> String {
    format!("{}", f64::from(seconds) / 3600.0)
}

pub fn parse_oneday(
    body: &Value,
    location: &str,
    date: NaiveDate,
    requested_offset: Option<i32>,
) -> Result<RawAstronomicalEvent> {
    if let Some(err) = body.get("error") {
        let message = err.as_str().map(String::from).unwrap_or_else(|| err.to_string());
        return Err(PipelineError::malformed(USNO_SOURCE, message));
    }
    let data = body
        .get("properties")
        .and_then(|p| p.get("data"))
        .ok_or_else(|| PipelineError::malformed(USNO_SOURCE, "missing 'properties.data'"))?;
    let sundata = data
        .get("sundata")
        .and_then(|s| s.as_array())
        .ok_or_else(|| PipelineError::malformed(USNO_SOURCE, "missing 'sundata' array"))?;

    let mut sunrise = None;
    let mut sunset = None;
    for entry in sundata {
        let phen = entry.get("phen").and_then(|p| p.as_str()).unwrap_or_default();
        let time = entry.get("time").and_then(|t| t.as_str());
        match (phen, time) {
            ("Rise", Some(t)) => sunrise = Some(clock_time(t)),
            ("Set", Some(t)) => sunset = Some(clock_time(t)),
            ("Rise", None) | ("Set", None) => {
                return Err(PipelineError::malformed(
                    USNO_SOURCE,
                    format!("'{}' entry has no time", phen),
                ))
            }
            _ => {}
        }
    }

    let tz_offset = match data.get("tz").and_then(|tz| tz.as_f64()) {
        Some(hours) => match ZoneSpec::from_hours(hours) {
            Some(ZoneSpec::Fixed(offset)) => Some(format_offset(offset.local_minus_utc())),
            _ => return Err(PipelineError::malformed(USNO_SOURCE, format!("bad tz {}", hours))),
        },
        None => requested_offset.map(format_offset),
    };

    Ok(RawAstronomicalEvent {
        location: location.to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        sunrise,
        sunset,
        tz_offset,
    })
}

/// USNO appends a zone label to some times (`05:18 ST`); keep the clock part.
fn clock_time(text: &str) -> String {
    text.split_whitespace().next().unwrap_or_default().to_string()
}

#[async_trait]
impl AstronomicalSource for UsnoAlmanac {
    fn source_name(&self) -> &'static str {
        USNO_SOURCE
    }

    #[instrument(skip(self, location), fields(location = %location.key))]
    async fn fetch_events(
        &self,
        location: &LocationConfig,
        dates: &DateSpan,
    ) -> Result<Vec<RawAstronomicalEvent>> {
        let (lat, lon) = location.coordinates().ok_or_else(|| {
            PipelineError::Config(format!(
                "location '{}' needs latitude and longitude for {}",
                location.key, USNO_SOURCE
            ))
        })?;
        let zone = match location.timezone.as_deref() {
            Some(tz) => Some(ZoneSpec::parse(tz).ok_or_else(|| {
                PipelineError::Config(format!("location '{}' has unknown timezone '{}'", location.key, tz))
            })?),
            None => None,
        };

        let mut events = Vec::new();
        for date in dates.dates() {
            // DST is folded into the offset so USNO answers in the location's wall clock
            let offset = zone.map(|z| z.offset_seconds_on(date));
            let query = vec![
                ("date", date.format("%Y-%m-%d").to_string()),
                ("coords", format!("{},{}", lat, lon)),
                ("tz", format_hours(offset.unwrap_or(0))),
                ("dst", "false".to_string()),
            ];
            let body = self.http.get_json(&self.base_url, &query, None).await?;
            events.push(parse_oneday(&body, location.almanac_id(), date, offset.or(Some(0)))?);
        }
        debug!(count = events.len(), "Fetched USNO almanac days");
        Ok(events)
    }
}
