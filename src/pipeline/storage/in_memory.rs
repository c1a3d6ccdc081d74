use super::{PersistSummary, RecordStore};
use crate::common::error::{PipelineError, Result};
use crate::common::types::{NormalizedRecord, RecordKey, TimeRange};
use crate::config::DuplicatePolicy;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory store for development and tests
pub struct InMemoryStore {
    records: Arc<Mutex<BTreeMap<RecordKey, NormalizedRecord>>>,
    policy: DuplicatePolicy,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DuplicatePolicy::KeepExisting)
    }
}

impl InMemoryStore {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> PipelineError {
    PipelineError::PersistenceError("in-memory store lock poisoned".into())
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn persist(&self, records: &[NormalizedRecord]) -> Result<PersistSummary> {
        let mut stored = self.records.lock().map_err(poisoned)?;
        let mut summary = PersistSummary::default();
        for record in records {
            let key = record.key();
            match stored.get_mut(&key) {
                None => {
                    stored.insert(key, record.clone());
                    summary.inserted += 1;
                }
                Some(existing) if self.policy == DuplicatePolicy::Overwrite && existing != record => {
                    *existing = record.clone();
                    summary.replaced += 1;
                }
                Some(_) => summary.unchanged += 1,
            }
        }
        debug!(
            inserted = summary.inserted,
            replaced = summary.replaced,
            unchanged = summary.unchanged,
            "Persisted batch in memory"
        );
        Ok(summary)
    }

    async fn query(&self, location: &str, range: &TimeRange) -> Result<Vec<NormalizedRecord>> {
        let stored = self.records.lock().map_err(poisoned)?;
        // BTreeMap order is (location, timestamp, kind)
        Ok(stored
            .values()
            .filter(|r| r.location == location && range.contains(r.timestamp))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::RecordKind;
    use chrono::{DateTime, NaiveDate, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_keep_existing_ignores_second_write() {
        let store = InMemoryStore::new(DuplicatePolicy::KeepExisting);
        let first = NormalizedRecord::tide_height("A", ts("2024-06-01T17:00:00Z"), 1.2);
        let second = NormalizedRecord::tide_height("A", ts("2024-06-01T17:00:00Z"), 1.3);

        let s1 = store.persist(&[first.clone()]).await.unwrap();
        let s2 = store.persist(&[second]).await.unwrap();
        assert_eq!(s1.inserted, 1);
        assert_eq!(s2.unchanged, 1);

        let day = TimeRange::whole_days(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 1);
        assert_eq!(store.query("A", &day).await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let store = InMemoryStore::new(DuplicatePolicy::Overwrite);
        let at = ts("2024-06-01T17:00:00Z");
        store.persist(&[NormalizedRecord::tide_height("A", at, 1.2)]).await.unwrap();
        let summary = store
            .persist(&[NormalizedRecord::tide_height("A", at, 1.3)])
            .await
            .unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(store.len(), 1);

        let day = TimeRange::whole_days(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 1);
        assert_eq!(store.query("A", &day).await.unwrap()[0].value, Some(1.3));
    }

    #[tokio::test]
    async fn test_query_orders_by_time_then_kind() {
        let store = InMemoryStore::default();
        let at = ts("2024-06-01T12:48:00Z");
        store
            .persist(&[
                NormalizedRecord::event("A", ts("2024-06-02T03:32:00Z"), RecordKind::Sunset),
                NormalizedRecord::event("A", at, RecordKind::Sunrise),
                NormalizedRecord::tide_height("A", at, 0.4),
                NormalizedRecord::tide_height("B", at, 0.9),
            ])
            .await
            .unwrap();

        let day = TimeRange::whole_days(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 1);
        let kinds: Vec<_> = store
            .query("A", &day)
            .await
            .unwrap()
            .iter()
            .map(|r| r.kind)
            .collect();
        // Sunset at 03:32Z on the 2nd falls outside the half-open day
        assert_eq!(kinds, vec![RecordKind::TideHeight, RecordKind::Sunrise]);
    }
}
