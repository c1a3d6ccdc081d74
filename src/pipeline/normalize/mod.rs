//! Normalization of raw provider records into canonical records.
//!
//! The normalizer is the anti-corruption layer between the adapters and the
//! store: whatever a provider sends, what comes out is keyed by canonical
//! location, stamped in UTC, measured in meters, and sorted by
//! (location, timestamp, kind). A record that cannot be canonicalized is
//! dropped and reported; the rest of the batch continues.

pub mod registry;
pub mod units;
pub mod zone;

use crate::common::error::{PipelineError, Result};
use crate::common::types::{NormalizedRecord, RawAstronomicalEvent, RawTideObservation, RecordKind};
use chrono::NaiveDate;
use registry::{LocationRegistry, Site};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, warn};
use zone::{parse_local_time, parse_timestamp, ParsedTimestamp, ZoneSpec};

/// A raw record the normalizer could not canonicalize.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Provider location id as it arrived
    pub location: String,
    pub kind: RecordKind,
    #[serde(serialize_with = "serialize_error")]
    pub error: PipelineError,
}

fn serialize_error<S: serde::Serializer>(err: &PipelineError, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&err.to_string())
}

/// Output of one normalization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizationReport {
    pub records: Vec<NormalizedRecord>,
    pub rejected: Vec<Rejection>,
}

pub struct Normalizer {
    registry: LocationRegistry,
}

impl Normalizer {
    pub fn new(registry: LocationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    /// Normalize one batch of raw inputs. Pure: same inputs, same ordered output.
    pub fn normalize(
        &self,
        tides: &[RawTideObservation],
        events: &[RawAstronomicalEvent],
    ) -> NormalizationReport {
        let mut report = NormalizationReport::default();

        for raw in tides {
            match self.normalize_tide(raw) {
                Ok(record) => report.records.push(record),
                Err(error) => {
                    warn!(location = %raw.location, error = %error, "Dropping tide observation");
                    report.rejected.push(Rejection {
                        location: raw.location.clone(),
                        kind: RecordKind::TideHeight,
                        error,
                    });
                }
            }
        }

        for raw in events {
            for (kind, result) in self.normalize_event(raw) {
                match result {
                    Ok(record) => report.records.push(record),
                    Err(error) => {
                        warn!(location = %raw.location, kind = %kind, error = %error, "Dropping astronomical event");
                        report.rejected.push(Rejection {
                            location: raw.location.clone(),
                            kind,
                            error,
                        });
                    }
                }
            }
        }

        sort_canonical(&mut report.records);
        report.records.dedup();
        debug!(
            records = report.records.len(),
            rejected = report.rejected.len(),
            "Normalization pass complete"
        );
        report
    }

    /// Canonicalize one tide observation: UTC timestamp, meters, canonical key.
    pub fn normalize_tide(&self, raw: &RawTideObservation) -> Result<NormalizedRecord> {
        let site = self.registry.resolve(&raw.location);
        let meters = units::height_to_meters(raw.height, &raw.unit).ok_or_else(|| {
            PipelineError::UnresolvableUnit {
                location: raw.location.clone(),
                unit: raw.unit.clone(),
            }
        })?;

        let timestamp = match parse_timestamp(&raw.timestamp) {
            Some(ParsedTimestamp::Absolute(ts)) => ts,
            Some(ParsedTimestamp::Naive(local)) => {
                let zone = site.zone.ok_or_else(|| {
                    PipelineError::timezone(
                        &raw.location,
                        format!("'{}' has no offset and the location has no timezone", raw.timestamp),
                    )
                })?;
                zone.to_utc(&local).ok_or_else(|| {
                    PipelineError::timezone(
                        &raw.location,
                        format!("'{}' does not exist in the location's timezone", raw.timestamp),
                    )
                })?
            }
            None => {
                return Err(PipelineError::timezone(
                    &raw.location,
                    format!("cannot place '{}' on the UTC timeline", raw.timestamp),
                ))
            }
        };

        Ok(NormalizedRecord::tide_height(site.key, timestamp, meters))
    }

    /// Canonicalize one almanac day into up to two event records.
    ///
    /// Sunrise and sunset are local clock times on the event's local date; they
    /// are combined with that date before conversion so that an evening sunset
    /// west of Greenwich lands on the next UTC day.
    pub fn normalize_event(
        &self,
        raw: &RawAstronomicalEvent,
    ) -> Vec<(RecordKind, Result<NormalizedRecord>)> {
        let phenomena = [
            (RecordKind::Sunrise, raw.sunrise.as_deref()),
            (RecordKind::Sunset, raw.sunset.as_deref()),
        ];
        let present: Vec<(RecordKind, &str)> = phenomena
            .into_iter()
            .filter_map(|(kind, time)| time.map(|t| (kind, t)))
            .collect();
        if present.is_empty() {
            return Vec::new();
        }

        let site = self.registry.resolve(&raw.location);
        let context = self.event_context(raw, &site);
        present
            .into_iter()
            .map(|(kind, time)| {
                let result = context.clone().and_then(|(date, zone)| {
                    let local_time = parse_local_time(time).ok_or_else(|| {
                        PipelineError::timezone(
                            &raw.location,
                            format!("cannot read {} time '{}'", kind, time),
                        )
                    })?;
                    let ts = zone.to_utc(&date.and_time(local_time)).ok_or_else(|| {
                        PipelineError::timezone(
                            &raw.location,
                            format!("{} {} {} does not exist in the declared zone", kind, raw.date, time),
                        )
                    })?;
                    Ok(NormalizedRecord::event(site.key.clone(), ts, kind))
                });
                (kind, result)
            })
            .collect()
    }

    fn event_context(&self, raw: &RawAstronomicalEvent, site: &Site) -> Result<(NaiveDate, ZoneSpec)> {
        let date = NaiveDate::parse_from_str(raw.date.trim(), "%Y-%m-%d").map_err(|_| {
            PipelineError::timezone(&raw.location, format!("cannot read date '{}'", raw.date))
        })?;
        let zone = match raw.tz_offset.as_deref() {
            Some(declared) => ZoneSpec::parse(declared).ok_or_else(|| {
                PipelineError::timezone(&raw.location, format!("unknown timezone '{}'", declared))
            })?,
            None => site.zone.ok_or_else(|| {
                PipelineError::timezone(
                    &raw.location,
                    "no timezone declared and the location has no timezone",
                )
            })?,
        };
        Ok((date, zone))
    }
}

/// Sort by (location, timestamp, kind), then by value so that output order
/// never depends on input order.
pub fn sort_canonical(records: &mut [NormalizedRecord]) {
    records.sort_by(|a, b| {
        (&a.location, a.timestamp, a.kind)
            .cmp(&(&b.location, b.timestamp, b.kind))
            .then_with(|| compare_values(a.value, b.value))
    });
}

fn compare_values(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn tide(location: &str, ts: &str, height: f64, unit: &str) -> RawTideObservation {
        RawTideObservation {
            location: location.to_string(),
            timestamp: ts.to_string(),
            height,
            unit: unit.to_string(),
        }
    }

    fn sun(location: &str, date: &str, rise: Option<&str>, set: Option<&str>, tz: Option<&str>) -> RawAstronomicalEvent {
        RawAstronomicalEvent {
            location: location.to_string(),
            date: date.to_string(),
            sunrise: rise.map(String::from),
            sunset: set.map(String::from),
            tz_offset: tz.map(String::from),
        }
    }

    #[test]
    fn test_tide_observation_scenario() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let record = normalizer
            .normalize_tide(&tide("StationA", "2024-06-01T10:00:00-07:00", 1.2, "m"))
            .unwrap();
        assert_eq!(record.location, "StationA");
        assert_eq!(record.timestamp, utc("2024-06-01T17:00:00Z"));
        assert_eq!(record.kind, RecordKind::TideHeight);
        assert_eq!(record.value, Some(1.2));
        assert_eq!(record.unit.as_deref(), Some("m"));
    }

    #[test]
    fn test_sun_event_crosses_utc_day_boundary() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let results = normalizer.normalize_event(&sun(
            "StationA",
            "2024-06-01",
            Some("05:48"),
            Some("20:32"),
            Some("-07:00"),
        ));
        let records: Vec<_> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::Sunrise);
        assert_eq!(records[0].timestamp, utc("2024-06-01T12:48:00Z"));
        assert_eq!(records[1].kind, RecordKind::Sunset);
        assert_eq!(records[1].timestamp, utc("2024-06-02T03:32:00Z"));
        assert!(records.iter().all(|r| r.value.is_none() && r.unit.is_none()));
    }

    #[test]
    fn test_feet_are_converted_and_naive_times_use_location_zone() {
        let mut registry = LocationRegistry::new();
        registry
            .add_site("phoenix", ZoneSpec::parse("US/Arizona"), &["9414290"])
            .unwrap();
        let normalizer = Normalizer::new(registry);
        let record = normalizer
            .normalize_tide(&tide("9414290", "2024-06-01 10:00", 10.0, "ft"))
            .unwrap();
        assert_eq!(record.location, "phoenix");
        assert_eq!(record.timestamp, utc("2024-06-01T17:00:00Z"));
        assert!((record.value.unwrap() - 3.048).abs() < 1e-9);
    }

    #[test]
    fn test_missing_timezone_is_rejected_without_aborting_batch() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let report = normalizer.normalize(
            &[
                tide("StationA", "2024-06-01 10:00", 1.0, "m"),
                tide("StationA", "2024-06-01T11:00:00Z", 1.1, "m"),
            ],
            &[sun("StationA", "2024-06-01", Some("05:48"), Some("20:32"), None)],
        );
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].value, Some(1.1));
        assert_eq!(report.rejected.len(), 3);
        assert!(report
            .rejected
            .iter()
            .all(|r| matches!(r.error, PipelineError::UnresolvableTimezone { .. })));
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let report = normalizer.normalize(&[tide("StationA", "2024-06-01T10:00:00Z", 3.0, "fathoms")], &[]);
        assert!(report.records.is_empty());
        assert!(matches!(
            report.rejected[0].error,
            PipelineError::UnresolvableUnit { ref unit, .. } if unit == "fathoms"
        ));
    }

    #[test]
    fn test_polar_day_yields_no_sunset() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let report = normalizer.normalize(
            &[],
            &[
                sun("Tromso", "2024-06-21", None, None, Some("+02:00")),
                sun("Tromso", "2024-08-01", Some("02:31"), None, Some("+02:00")),
            ],
        );
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].kind, RecordKind::Sunrise);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_output_is_sorted_and_independent_of_input_order() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let tides = vec![
            tide("B", "2024-06-01T12:48:00Z", 0.5, "m"),
            tide("A", "2024-06-01T13:00:00Z", 0.7, "m"),
            tide("A", "2024-06-01T12:48:00Z", 0.9, "m"),
        ];
        let events = vec![sun("A", "2024-06-01", Some("05:48"), Some("20:32"), Some("-07:00"))];

        let forward = normalizer.normalize(&tides, &events);
        let mut reversed_tides = tides.clone();
        reversed_tides.reverse();
        let backward = normalizer.normalize(&reversed_tides, &events);
        assert_eq!(forward.records, backward.records);

        let keys: Vec<_> = forward
            .records
            .iter()
            .map(|r| (r.location.as_str(), r.timestamp, r.kind))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A", utc("2024-06-01T12:48:00Z"), RecordKind::TideHeight),
                ("A", utc("2024-06-01T12:48:00Z"), RecordKind::Sunrise),
                ("A", utc("2024-06-01T13:00:00Z"), RecordKind::TideHeight),
                ("A", utc("2024-06-02T03:32:00Z"), RecordKind::Sunset),
                ("B", utc("2024-06-01T12:48:00Z"), RecordKind::TideHeight),
            ]
        );
    }

    #[test]
    fn test_declared_named_zone_on_event() {
        let normalizer = Normalizer::new(LocationRegistry::new());
        let results = normalizer.normalize_event(&sun(
            "phoenix",
            "2024-01-15",
            Some("07:32"),
            None,
            Some("US/Arizona"),
        ));
        let record = results.into_iter().next().unwrap().1.unwrap();
        assert_eq!(record.timestamp, utc("2024-01-15T14:32:00Z"));
    }
}
