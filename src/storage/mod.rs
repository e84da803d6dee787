//! SQLite storage layer -- telemetry samples with their verdicts, and the
//! history provider the server feeds the outlier model from.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::{Severity, Verdict};
use crate::history::HistoryProvider;
use crate::telemetry::{FeatureVector, TelemetrySample};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// A stored sample and the verdict it received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub vehicle_id: String,
    pub speed: f64,
    pub fuel_level: f64,
    pub temperature: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub rule_anomaly: bool,
    pub ml_anomaly: bool,
    pub model_evaluated: bool,
    pub anomaly_reason: String,
    pub health_score: u8,
    pub severity: Severity,
}

const RECORD_COLUMNS: &str = "id, vehicle_id, speed, fuel_level, temperature, latitude, longitude, timestamp, \
     rule_anomaly, ml_anomaly, model_evaluated, anomaly_reason, health_score, severity";

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

impl TelemetryRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let ts: String = row.get(7)?;
        let sev: String = row.get(13)?;
        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e.to_string()))?,
            vehicle_id: row.get(1)?,
            speed: row.get(2)?,
            fuel_level: row.get(3)?,
            temperature: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            timestamp: DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| conversion_error(7, e.to_string()))?
                .with_timezone(&Utc),
            rule_anomaly: row.get(8)?,
            ml_anomaly: row.get(9)?,
            model_evaluated: row.get(10)?,
            anomaly_reason: row.get(11)?,
            health_score: row.get(12)?,
            severity: sev.parse().map_err(|e: String| conversion_error(13, e))?,
        })
    }
}

/// Fixed-width UTC so that text ordering matches time ordering.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_ts(ts: &DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(chrono::Duration::microseconds(1)).unwrap_or(*ts)
}

/// Where a sample's timestamp came from. Decides what happens when it
/// falls behind the vehicle's latest stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// Supplied by the producer: an earlier timestamp is rejected.
    Client,
    /// Stamped at ingest: moved forward to the latest stored timestamp.
    Server,
}

/// Result of an ordered insert.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved { id: Uuid, timestamp: DateTime<Utc> },
    OutOfOrder { latest: DateTime<Utc> },
}

fn insert_record(conn: &Connection, id: Uuid, sample: &TelemetrySample, verdict: &Verdict) -> Result<()> {
    conn.execute(
        "INSERT INTO telemetry (id, vehicle_id, speed, fuel_level, temperature, latitude, longitude, timestamp,
                                rule_anomaly, ml_anomaly, model_evaluated, anomaly_reason, health_score, severity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            id.to_string(),
            sample.vehicle_id,
            sample.speed,
            sample.fuel_level,
            sample.temperature,
            sample.latitude,
            sample.longitude,
            encode_ts(&sample.timestamp),
            verdict.rule_triggered,
            verdict.model_triggered,
            verdict.model_evaluated,
            verdict.anomaly_reason(),
            verdict.health_score,
            verdict.severity.as_str(),
        ],
    )
    .context("failed to save telemetry record")?;
    Ok(())
}

fn max_timestamp(conn: &Connection, vehicle: &str) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<String> = conn
        .query_row(
            "SELECT MAX(timestamp) FROM telemetry WHERE vehicle_id = ?1",
            params![vehicle],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    ts.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("corrupt timestamp in telemetry table: {s}"))
    })
    .transpose()
}

/// Persist a sample and its verdict without any ordering check.
pub fn save_record(pool: &Pool, sample: &TelemetrySample, verdict: &Verdict) -> Result<Uuid> {
    let conn = pool.get()?;
    let id = Uuid::new_v4();
    insert_record(&conn, id, sample, verdict)?;
    Ok(id)
}

/// Persist a sample only if it keeps the vehicle's timestamps
/// non-decreasing. The read of the latest timestamp and the insert share one
/// `BEGIN IMMEDIATE` transaction, so concurrent writers for the same vehicle
/// are serialised.
pub fn save_record_ordered(
    pool: &Pool,
    sample: &TelemetrySample,
    verdict: &Verdict,
    source: TimestampSource,
) -> Result<SaveOutcome> {
    let mut conn = pool.get()?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to begin telemetry transaction")?;

    let mut stored = sample.clone();
    if let Some(latest) = max_timestamp(&tx, &sample.vehicle_id)? {
        // Compare at storage precision.
        let ts = truncate_ts(&sample.timestamp);
        if ts < latest {
            match source {
                TimestampSource::Client => return Ok(SaveOutcome::OutOfOrder { latest }),
                TimestampSource::Server => stored.timestamp = latest,
            }
        }
    }

    let id = Uuid::new_v4();
    insert_record(&tx, id, &stored, verdict)?;
    tx.commit().context("failed to commit telemetry record")?;

    Ok(SaveOutcome::Saved {
        id,
        timestamp: stored.timestamp,
    })
}

/// The most recent `limit` records, oldest first. `vehicle = None` spans all
/// vehicles.
pub fn list_records(pool: &Pool, vehicle: Option<&str>, limit: usize) -> Result<Vec<TelemetryRecord>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM (
             SELECT *, rowid AS rid FROM telemetry
             WHERE (?1 IS NULL OR vehicle_id = ?1)
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2
         ) ORDER BY timestamp ASC, rid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![vehicle, limit as i64], TelemetryRecord::from_row)?;

    let mut records = Vec::new();
    for r in rows {
        records.push(r?);
    }
    Ok(records)
}

pub fn latest_record(pool: &Pool, vehicle: Option<&str>) -> Result<Option<TelemetryRecord>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM telemetry
         WHERE (?1 IS NULL OR vehicle_id = ?1)
         ORDER BY timestamp DESC, rowid DESC
         LIMIT 1"
    );
    let record = conn
        .query_row(&sql, params![vehicle], TelemetryRecord::from_row)
        .optional()?;
    Ok(record)
}

pub fn latest_timestamp(pool: &Pool, vehicle: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = pool.get()?;
    max_timestamp(&conn, vehicle)
}

/// Feature tuples of the most recent `limit` samples for `vehicle`, oldest
/// first. `limit = 0` loads everything.
pub fn load_features(pool: &Pool, vehicle: &str, limit: usize) -> Result<Vec<FeatureVector>> {
    let conn = pool.get()?;
    let limit = if limit == 0 { -1 } else { limit as i64 };
    let mut stmt = conn.prepare(
        "SELECT speed, fuel_level, temperature FROM (
             SELECT speed, fuel_level, temperature, timestamp, rowid AS rid FROM telemetry
             WHERE vehicle_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2
         ) ORDER BY timestamp ASC, rid ASC",
    )?;
    let rows = stmt.query_map(params![vehicle, limit], |row| {
        Ok(FeatureVector::new(row.get(0)?, row.get(1)?, row.get(2)?))
    })?;

    let mut features = Vec::new();
    for r in rows {
        features.push(r?);
    }
    Ok(features)
}

/// History provider backed by the telemetry table.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: Pool,
    limit: usize,
}

impl SqliteHistory {
    pub fn new(pool: Pool, limit: usize) -> Self {
        Self { pool, limit }
    }
}

#[async_trait::async_trait]
impl HistoryProvider for SqliteHistory {
    async fn snapshot(&self, vehicle_id: &str) -> Result<Vec<FeatureVector>> {
        let pool = self.pool.clone();
        let limit = self.limit;
        let vehicle = vehicle_id.to_string();
        tokio::task::spawn_blocking(move || load_features(&pool, &vehicle, limit)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("fleetmedic.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn sample(vehicle: &str, speed: f64, ts: DateTime<Utc>) -> TelemetrySample {
        TelemetrySample {
            vehicle_id: vehicle.into(),
            speed,
            fuel_level: 40.0,
            temperature: 70.0,
            latitude: 17.385,
            longitude: 78.4867,
            timestamp: ts,
        }
    }

    fn verdict() -> Verdict {
        Verdict {
            rule_triggered: true,
            model_triggered: false,
            model_evaluated: true,
            reasons: vec!["Overspeed".into(), "Low Fuel".into()],
            health_score: 60,
            severity: Severity::Warning,
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let (_dir, pool) = pool();
        let ts = Utc::now();
        let id = save_record(&pool, &sample("a", 120.0, ts), &verdict()).unwrap();

        let rec = latest_record(&pool, Some("a")).unwrap().unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(rec.speed, 120.0);
        assert!(rec.rule_anomaly);
        assert!(!rec.ml_anomaly);
        assert!(rec.model_evaluated);
        assert_eq!(rec.anomaly_reason, "Overspeed | Low Fuel");
        assert_eq!(rec.health_score, 60);
        assert_eq!(rec.severity, Severity::Warning);
        assert_eq!(encode_ts(&rec.timestamp), encode_ts(&ts));

        assert!(latest_record(&pool, Some("b")).unwrap().is_none());
    }

    #[test]
    fn test_list_is_ascending_and_limited() {
        let (_dir, pool) = pool();
        let base = Utc::now();
        for i in 0..5 {
            let ts = base + Duration::seconds(i);
            save_record(&pool, &sample("a", 50.0 + i as f64, ts), &verdict()).unwrap();
        }
        save_record(&pool, &sample("b", 99.0, base), &verdict()).unwrap();

        let all_a = list_records(&pool, Some("a"), 100).unwrap();
        let speeds: Vec<f64> = all_a.iter().map(|r| r.speed).collect();
        assert_eq!(speeds, vec![50.0, 51.0, 52.0, 53.0, 54.0]);

        let last_two = list_records(&pool, Some("a"), 2).unwrap();
        let speeds: Vec<f64> = last_two.iter().map(|r| r.speed).collect();
        assert_eq!(speeds, vec![53.0, 54.0]);

        assert_eq!(list_records(&pool, None, 100).unwrap().len(), 6);
    }

    #[test]
    fn test_load_features_and_latest_timestamp() {
        let (_dir, pool) = pool();
        assert!(latest_timestamp(&pool, "a").unwrap().is_none());
        assert!(load_features(&pool, "a", 0).unwrap().is_empty());

        let base = Utc::now();
        for i in 0..4 {
            save_record(&pool, &sample("a", 10.0 * i as f64, base + Duration::seconds(i)), &verdict()).unwrap();
        }

        let all = load_features(&pool, "a", 0).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0], FeatureVector::new(0.0, 40.0, 70.0));

        let recent = load_features(&pool, "a", 2).unwrap();
        assert_eq!(recent.iter().map(|f| f.speed).collect::<Vec<_>>(), vec![20.0, 30.0]);

        let latest = latest_timestamp(&pool, "a").unwrap().unwrap();
        assert_eq!(encode_ts(&latest), encode_ts(&(base + Duration::seconds(3))));
    }

    #[test]
    fn test_ordered_save_rejects_late_client_timestamps() {
        let (_dir, pool) = pool();
        let base = Utc::now();

        let first = save_record_ordered(&pool, &sample("a", 60.0, base), &verdict(), TimestampSource::Client).unwrap();
        assert!(matches!(first, SaveOutcome::Saved { .. }));

        // Equal is fine, earlier is not.
        let same = save_record_ordered(&pool, &sample("a", 61.0, base), &verdict(), TimestampSource::Client).unwrap();
        assert!(matches!(same, SaveOutcome::Saved { .. }));
        let late = save_record_ordered(
            &pool,
            &sample("a", 62.0, base - Duration::seconds(1)),
            &verdict(),
            TimestampSource::Client,
        )
        .unwrap();
        match late {
            SaveOutcome::OutOfOrder { latest } => assert_eq!(encode_ts(&latest), encode_ts(&base)),
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
        assert_eq!(list_records(&pool, Some("a"), 10).unwrap().len(), 2);

        // Other vehicles have their own ordering.
        let other = save_record_ordered(
            &pool,
            &sample("b", 62.0, base - Duration::seconds(1)),
            &verdict(),
            TimestampSource::Client,
        )
        .unwrap();
        assert!(matches!(other, SaveOutcome::Saved { .. }));
    }

    #[test]
    fn test_ordered_save_moves_server_stamp_forward() {
        let (_dir, pool) = pool();
        let future = Utc::now() + Duration::days(365);
        save_record_ordered(&pool, &sample("a", 60.0, future), &verdict(), TimestampSource::Client).unwrap();

        let outcome =
            save_record_ordered(&pool, &sample("a", 61.0, Utc::now()), &verdict(), TimestampSource::Server).unwrap();
        let SaveOutcome::Saved { timestamp, .. } = outcome else {
            panic!("server-stamped sample must be stored");
        };
        assert_eq!(encode_ts(&timestamp), encode_ts(&future));

        let stored: Vec<String> = list_records(&pool, Some("a"), 10)
            .unwrap()
            .iter()
            .map(|r| encode_ts(&r.timestamp))
            .collect();
        assert_eq!(stored, vec![encode_ts(&future), encode_ts(&future)]);
        assert_eq!(list_records(&pool, Some("a"), 10).unwrap()[1].speed, 61.0);
    }

    #[test]
    fn test_concurrent_ordered_saves_stay_non_decreasing() {
        let (_dir, pool) = pool();
        let base = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let ts = base + Duration::milliseconds(if i % 2 == 0 { 100 * i } else { -100 * i });
                    save_record_ordered(&pool, &sample("a", i as f64, ts), &verdict(), TimestampSource::Client)
                        .unwrap()
                })
            })
            .collect();
        let saved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, SaveOutcome::Saved { .. }))
            .count();

        // Insertion order (rowid) must agree with timestamp order.
        let conn = pool.get().unwrap();
        let mut stmt = conn
            .prepare("SELECT timestamp FROM telemetry WHERE vehicle_id = 'a' ORDER BY rowid")
            .unwrap();
        let stamps: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(stamps.len(), saved);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
    }

    #[tokio::test]
    async fn test_sqlite_history_snapshot() {
        let (_dir, pool) = pool();
        save_record(&pool, &sample("a", 70.0, Utc::now()), &verdict()).unwrap();
        let history = SqliteHistory::new(pool, 0);
        assert_eq!(history.snapshot("a").await.unwrap().len(), 1);
        assert!(history.snapshot("z").await.unwrap().is_empty());
    }
}
