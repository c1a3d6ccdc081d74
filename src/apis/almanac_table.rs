use super::AstronomicalSource;
use crate::common::constants::ALMANAC_TABLE_SOURCE;
use crate::common::error::{PipelineError, Result};
use crate::common::types::{DateSpan, RawAstronomicalEvent};
use crate::config::{AlmanacConfig, LocationConfig};
use crate::pipeline::normalize::zone::{parse_timestamp, ParsedTimestamp};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// One row of a sunrise/sunset table: local date-times for one reference-year day.
#[derive(Debug, Deserialize)]
struct TableRow {
    sunrise: Option<String>,
    sunset: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct DayTimes {
    sunrise: Option<String>,
    sunset: Option<String>,
}

/// Perennial sunrise/sunset table read from a CSV file.
///
/// The file covers one reference year; any requested date is looked up by its
/// month and day. A day the table lacks takes the previous day's times.
pub struct AlmanacTable {
    path_template: String,
    timezone: Option<String>,
}

impl AlmanacTable {
    pub fn from_config(config: &AlmanacConfig) -> Result<Self> {
        let path_template = config.table_path.clone().ok_or_else(|| {
            PipelineError::Config("almanac provider 'table' requires table_path".into())
        })?;
        Ok(Self {
            path_template,
            timezone: config.table_timezone.clone(),
        })
    }

    fn path_for(&self, almanac_id: &str) -> String {
        self.path_template.replace("{id}", almanac_id)
    }
}

fn clock(text: Option<String>, column: &str, line: usize) -> Result<Option<String>> {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };
    match parse_timestamp(&text) {
        Some(ParsedTimestamp::Naive(local)) => Ok(Some(local.format("%H:%M:%S").to_string())),
        _ => Err(PipelineError::malformed(
            ALMANAC_TABLE_SOURCE,
            format!("row {}: '{}' is not a local date-time in column {}", line, text, column),
        )),
    }
}

fn day_key(text: &str) -> Option<(u32, u32)> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M"))
        .ok()
        .map(|dt| (dt.month(), dt.day()))
}

/// Parse table CSV into a (month, day) index.
fn parse_table(content: &str) -> Result<HashMap<(u32, u32), DayTimes>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut days = HashMap::new();
    for (i, row) in reader.deserialize::<TableRow>().enumerate() {
        let line = i + 2;
        let row = row.map_err(|e| {
            PipelineError::malformed(ALMANAC_TABLE_SOURCE, format!("row {}: {}", line, e))
        })?;
        // Either column dates the row; polar days leave one of them empty
        let key = row
            .sunrise
            .as_deref()
            .and_then(day_key)
            .or_else(|| row.sunset.as_deref().and_then(day_key))
            .ok_or_else(|| {
                PipelineError::malformed(ALMANAC_TABLE_SOURCE, format!("row {} has no usable date", line))
            })?;
        let times = DayTimes {
            sunrise: clock(row.sunrise, "sunrise", line)?,
            sunset: clock(row.sunset, "sunset", line)?,
        };
        days.insert(key, times);
    }
    Ok(days)
}

fn lookup(days: &HashMap<(u32, u32), DayTimes>, date: NaiveDate) -> Option<&DayTimes> {
    days.get(&(date.month(), date.day())).or_else(|| {
        let previous = date - Duration::days(1);
        days.get(&(previous.month(), previous.day()))
    })
}

fn events_from_table(
    content: &str,
    almanac_id: &str,
    dates: &DateSpan,
    timezone: Option<&str>,
) -> Result<Vec<RawAstronomicalEvent>> {
    let days = parse_table(content)?;
    dates
        .dates()
        .map(|date| {
            let times = lookup(&days, date).ok_or_else(|| {
                PipelineError::malformed(
                    ALMANAC_TABLE_SOURCE,
                    format!("table has no entry for {} or the day before", date.format("%m-%d")),
                )
            })?;
            Ok(RawAstronomicalEvent {
                location: almanac_id.to_string(),
                date: date.format("%Y-%m-%d").to_string(),
                sunrise: times.sunrise.clone(),
                sunset: times.sunset.clone(),
                tz_offset: timezone.map(String::from),
            })
        })
        .collect()
}

#[async_trait]
impl AstronomicalSource for AlmanacTable {
    fn source_name(&self) -> &'static str {
        ALMANAC_TABLE_SOURCE
    }

    #[instrument(skip(self, location), fields(location = %location.key))]
    async fn fetch_events(
        &self,
        location: &LocationConfig,
        dates: &DateSpan,
    ) -> Result<Vec<RawAstronomicalEvent>> {
        let path = self.path_for(location.almanac_id());
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            warn!(path = %path, error = %e, "Almanac table unreadable");
            PipelineError::unavailable(ALMANAC_TABLE_SOURCE, format!("cannot read '{}': {}", path, e))
        })?;
        let events = events_from_table(&content, location.almanac_id(), dates, self.timezone.as_deref())?;
        debug!(count = events.len(), path = %path, "Read almanac table");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sunrise,sunset
2000-02-27 07:05:00,2000-02-27 18:22:00
2000-02-28 07:04:00,2000-02-28 18:23:00
2000-03-01 07:02:00,2000-03-01 18:24:00
2000-06-21 05:19:00,2000-06-21 19:42:00
";

    #[test]
    fn test_lookup_by_month_and_day() {
        let span = DateSpan::new(NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(), 1);
        let events = events_from_table(TABLE, "PHX", &span, Some("US/Arizona")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, "2024-06-21");
        assert_eq!(events[0].sunrise.as_deref(), Some("05:19:00"));
        assert_eq!(events[0].sunset.as_deref(), Some("19:42:00"));
        assert_eq!(events[0].tz_offset.as_deref(), Some("US/Arizona"));
    }

    #[test]
    fn test_missing_day_falls_back_to_previous() {
        // The table skips Feb 29
        let span = DateSpan::new(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), 1);
        let events = events_from_table(TABLE, "PHX", &span, None).unwrap();
        assert_eq!(events[0].date, "2024-02-29");
        assert_eq!(events[0].sunrise.as_deref(), Some("07:04:00"));
        assert!(events[0].tz_offset.is_none());
    }

    #[test]
    fn test_gap_of_two_days_is_malformed() {
        let span = DateSpan::new(NaiveDate::from_ymd_opt(2024, 6, 23).unwrap(), 1);
        assert!(matches!(
            events_from_table(TABLE, "PHX", &span, None),
            Err(PipelineError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_bad_cell_is_malformed() {
        let bad = "sunrise,sunset\n2000-01-01 07:32:00,dusk\n";
        assert!(matches!(parse_table(bad), Err(PipelineError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_fetch_reads_file_per_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PHX.csv"), TABLE).unwrap();
        let config = AlmanacConfig {
            provider: ALMANAC_TABLE_SOURCE.to_string(),
            base_url: None,
            table_path: Some(format!("{}/{{id}}.csv", dir.path().display())),
            table_timezone: Some("US/Arizona".to_string()),
            timeout_secs: 5,
        };
        let table = AlmanacTable::from_config(&config).unwrap();
        let location = LocationConfig {
            key: "phoenix".to_string(),
            tide_station: None,
            almanac_id: Some("PHX".to_string()),
            latitude: None,
            longitude: None,
            timezone: None,
        };
        let span = DateSpan::new(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(), 3);
        let events = table.fetch_events(&location, &span).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].sunrise.as_deref(), Some("07:02:00"));

        let missing = LocationConfig { almanac_id: Some("TUS".to_string()), ..location };
        assert!(matches!(
            table.fetch_events(&missing, &span).await,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }
}
