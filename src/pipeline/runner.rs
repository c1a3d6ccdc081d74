use crate::apis::{
    almanac_source_from_config, tide_source_from_config, AstronomicalSource, TideSource,
};
use crate::common::error::{PipelineError, Result};
use crate::common::types::{DateSpan, RawAstronomicalEvent, RawTideObservation, TimeRange};
use crate::config::{Config, LocationConfig};
use crate::observability::metrics::{BatchMetrics, NormalizeMetrics, SourcesMetrics, StoreMetrics};
use crate::pipeline::normalize::registry::LocationRegistry;
use crate::pipeline::normalize::{NormalizationReport, Normalizer};
use crate::pipeline::storage::{open_store, PersistSummary, RecordStore};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Which days a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub first_day: NaiveDate,
    pub days: u32,
}

impl BatchRequest {
    pub fn new(first_day: NaiveDate, days: u32) -> Self {
        Self {
            first_day,
            days: days.max(1),
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::whole_days(self.first_day, self.days)
    }

    pub fn date_span(&self) -> DateSpan {
        DateSpan::new(self.first_day, self.days)
    }
}

/// One adapter fetch that failed for one location.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub location: String,
    pub source: String,
    pub error_kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub first_day: NaiveDate,
    pub days: u32,
    pub locations: usize,
    pub fetched_tide: usize,
    pub fetched_astro: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub persisted: PersistSummary,
    pub source_failures: Vec<SourceFailure>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.source_failures.is_empty()
    }
}

/// Fetch, normalize and persist one batch across every configured location.
///
/// Adapter failures are recorded per location and do not stop the batch.
/// Persistence failures abort the batch and are returned. Nothing is written
/// until every fetch has completed, so cancelling never leaves a partial write.
pub struct BatchRunner {
    tide: Arc<dyn TideSource>,
    almanac: Arc<dyn AstronomicalSource>,
    normalizer: Normalizer,
    store: Arc<dyn RecordStore>,
    locations: Vec<LocationConfig>,
}

struct Fetched {
    tides: Vec<RawTideObservation>,
    events: Vec<RawAstronomicalEvent>,
    failures: Vec<SourceFailure>,
}

impl BatchRunner {
    pub fn new(
        tide: Arc<dyn TideSource>,
        almanac: Arc<dyn AstronomicalSource>,
        normalizer: Normalizer,
        store: Arc<dyn RecordStore>,
        locations: Vec<LocationConfig>,
    ) -> Self {
        Self {
            tide,
            almanac,
            normalizer,
            store,
            locations,
        }
    }

    /// Wire sources, registry and store from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = LocationRegistry::from_locations(&config.locations)?;
        Ok(Self::new(
            tide_source_from_config(&config.tide)?,
            almanac_source_from_config(&config.almanac)?,
            Normalizer::new(registry),
            open_store(&config.store)?,
            config.locations.clone(),
        ))
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    /// Run one batch. Resolves to `Cancelled` if `cancel` completes before the
    /// fetches do.
    #[instrument(skip(self, cancel), fields(first_day = %request.first_day, days = request.days))]
    pub async fn run<C>(&self, request: BatchRequest, cancel: C) -> Result<BatchSummary>
    where
        C: Future<Output = ()> + Send,
    {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%batch_id, locations = self.locations.len(), "Starting batch");

        let fetched = tokio::select! {
            fetched = self.fetch_all(&request) => fetched,
            _ = cancel => {
                warn!(%batch_id, "Batch cancelled during fetch; nothing written");
                BatchMetrics::record_cancelled();
                return Err(PipelineError::Cancelled);
            }
        };

        let report: NormalizationReport = self.normalizer.normalize(&fetched.tides, &fetched.events);
        NormalizeMetrics::record_pass(report.records.len(), report.rejected.len());

        let persisted = match self.store.persist(&report.records).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(%batch_id, error = %e, "Persisting batch failed");
                StoreMetrics::record_error();
                return Err(e);
            }
        };
        StoreMetrics::record_persist(persisted.inserted, persisted.replaced, persisted.unchanged);
        BatchMetrics::record_duration(clock.elapsed().as_secs_f64());

        let summary = BatchSummary {
            batch_id,
            started_at,
            first_day: request.first_day,
            days: request.days,
            locations: self.locations.len(),
            fetched_tide: fetched.tides.len(),
            fetched_astro: fetched.events.len(),
            normalized: report.records.len(),
            rejected: report.rejected.len(),
            persisted,
            source_failures: fetched.failures,
        };
        info!(
            %batch_id,
            normalized = summary.normalized,
            rejected = summary.rejected,
            inserted = summary.persisted.inserted,
            failures = summary.source_failures.len(),
            "Batch complete"
        );
        Ok(summary)
    }

    async fn fetch_all(&self, request: &BatchRequest) -> Fetched {
        let range = request.time_range();
        let span = request.date_span();
        let per_location = self
            .locations
            .iter()
            .map(|location| self.fetch_location(location, &range, &span));
        let results = join_all(per_location).await;

        let mut fetched = Fetched {
            tides: Vec::new(),
            events: Vec::new(),
            failures: Vec::new(),
        };
        for (location, tide, astro) in results {
            match tide {
                Ok(mut t) => fetched.tides.append(&mut t),
                Err(e) => fetched.failures.push(failure(&location, self.tide.source_name(), &e)),
            }
            match astro {
                Ok(mut a) => fetched.events.append(&mut a),
                Err(e) => fetched.failures.push(failure(&location, self.almanac.source_name(), &e)),
            }
        }
        fetched
    }

    /// Tide and almanac fetches for one location run concurrently; both must
    /// finish before the location's results are handed on.
    async fn fetch_location(
        &self,
        location: &LocationConfig,
        range: &TimeRange,
        span: &DateSpan,
    ) -> (String, Result<Vec<RawTideObservation>>, Result<Vec<RawAstronomicalEvent>>) {
        let tide_source = self.tide.source_name();
        let almanac_source = self.almanac.source_name();
        let (tide, astro) = tokio::join!(
            timed(tide_source, &location.key, self.tide.fetch_tides(location, range)),
            timed(almanac_source, &location.key, self.almanac.fetch_events(location, span)),
        );
        (location.key.clone(), tide, astro)
    }
}

async fn timed<T, F>(source: &'static str, location: &str, fut: F) -> Result<Vec<T>>
where
    F: Future<Output = Result<Vec<T>>>,
{
    let started = Instant::now();
    let result = fut.await;
    match &result {
        Ok(records) => {
            SourcesMetrics::record_success(source, started.elapsed().as_secs_f64(), records.len())
        }
        Err(e) => {
            warn!(source, location, error = %e, "Source fetch failed");
            SourcesMetrics::record_error(source, e.kind());
        }
    }
    result
}

fn failure(location: &str, source: &str, err: &PipelineError) -> SourceFailure {
    SourceFailure {
        location: location.to_string(),
        source: source.to_string(),
        error_kind: err.kind().to_string(),
        message: err.to_string(),
    }
}
