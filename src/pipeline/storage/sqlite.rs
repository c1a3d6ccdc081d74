use super::{PersistSummary, RecordStore};
use crate::common::error::{PipelineError, Result};
use crate::common::types::{NormalizedRecord, RecordKind, TimeRange};
use crate::config::DuplicatePolicy;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Stable id of a record key: sha256 over `location|ts_nanos|kind`.
pub fn record_id(record: &NormalizedRecord, ts_nanos: i64) -> String {
    let mut s = String::new();
    s.push_str(&record.location);
    s.push('|');
    s.push_str(&ts_nanos.to_string());
    s.push('|');
    s.push_str(record.kind.as_str());

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Nanoseconds since the epoch, the precision `NormalizedRecord` carries.
/// Instants outside 1677..2262 cannot be stored.
fn stored_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        PipelineError::PersistenceError(format!("timestamp {} is outside the storable range", ts))
    })
}

/// Query bound in stored nanoseconds, saturating at the storable range.
fn bound_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt()
        .unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

/// SQLite-backed record store. One connection behind a mutex serializes writers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    policy: DuplicatePolicy,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, policy: DuplicatePolicy) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::PersistenceError(format!(
                        "cannot create store directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn, policy)?;
        info!(path = %path.display(), "Opened SQLite record store");
        Ok(store)
    }

    pub fn open_in_memory(policy: DuplicatePolicy) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, policy)
    }

    fn with_connection(conn: Connection, policy: DuplicatePolicy) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS normalized_records (
                record_id  TEXT PRIMARY KEY,
                location   TEXT NOT NULL,
                ts_utc_ns  INTEGER NOT NULL,
                kind       TEXT NOT NULL,
                kind_rank  INTEGER NOT NULL,
                value      REAL,
                unit       TEXT,
                UNIQUE (location, ts_utc_ns, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_records_location_ts
                ON normalized_records (location, ts_utc_ns);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::PersistenceError("store connection lock poisoned".into()))
    }
}

fn persist_blocking(
    conn: &mut Connection,
    records: &[NormalizedRecord],
    policy: DuplicatePolicy,
) -> Result<PersistSummary> {
    let tx = conn.transaction()?;
    let mut summary = PersistSummary::default();
    {
        let mut existing = tx.prepare("SELECT value, unit FROM normalized_records WHERE record_id = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO normalized_records (record_id, location, ts_utc_ns, kind, kind_rank, value, unit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut update =
            tx.prepare("UPDATE normalized_records SET value = ?2, unit = ?3 WHERE record_id = ?1")?;

        for record in records {
            let nanos = stored_nanos(record.timestamp)?;
            let id = record_id(record, nanos);
            let stored: Option<(Option<f64>, Option<String>)> = existing
                .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            match stored {
                None => {
                    insert.execute(params![
                        id,
                        record.location,
                        nanos,
                        record.kind.as_str(),
                        record.kind.rank(),
                        record.value,
                        record.unit,
                    ])?;
                    summary.inserted += 1;
                }
                Some((value, unit))
                    if policy == DuplicatePolicy::Overwrite
                        && (value != record.value || unit != record.unit) =>
                {
                    update.execute(params![id, record.value, record.unit])?;
                    summary.replaced += 1;
                }
                Some(_) => summary.unchanged += 1,
            }
        }
    }
    tx.commit()?;
    Ok(summary)
}

fn query_blocking(conn: &Connection, location: &str, range: &TimeRange) -> Result<Vec<NormalizedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT location, ts_utc_ns, kind, value, unit FROM normalized_records
         WHERE location = ?1 AND ts_utc_ns >= ?2 AND ts_utc_ns < ?3
         ORDER BY ts_utc_ns, kind_rank",
    )?;
    let rows = stmt.query_map(
        params![location, bound_nanos(range.start), bound_nanos(range.end)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    )?;

    let mut records = Vec::new();
    for row in rows {
        let (location, nanos, kind, value, unit) = row?;
        let timestamp: DateTime<Utc> = Utc.timestamp_nanos(nanos);
        records.push(NormalizedRecord {
            location,
            timestamp,
            kind: kind.parse::<RecordKind>()?,
            value,
            unit,
        });
    }
    Ok(records)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn persist(&self, records: &[NormalizedRecord]) -> Result<PersistSummary> {
        let mut conn = self.lock()?;
        let summary = persist_blocking(&mut conn, records, self.policy)?;
        debug!(
            inserted = summary.inserted,
            replaced = summary.replaced,
            unchanged = summary.unchanged,
            "Committed record batch"
        );
        Ok(summary)
    }

    async fn query(&self, location: &str, range: &TimeRange) -> Result<Vec<NormalizedRecord>> {
        let conn = self.lock()?;
        query_blocking(&conn, location, range)
    }
}
