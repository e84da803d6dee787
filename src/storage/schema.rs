//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS telemetry (
            id TEXT PRIMARY KEY,
            vehicle_id TEXT NOT NULL,
            speed REAL NOT NULL,
            fuel_level REAL NOT NULL,
            temperature REAL NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            timestamp TEXT NOT NULL,
            rule_anomaly INTEGER NOT NULL DEFAULT 0,
            ml_anomaly INTEGER NOT NULL DEFAULT 0,
            anomaly_reason TEXT NOT NULL DEFAULT '',
            health_score INTEGER NOT NULL DEFAULT 100,
            severity TEXT NOT NULL DEFAULT 'Healthy',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_vehicle_ts ON telemetry(vehicle_id, timestamp);",
    )?;

    // Migration: record whether the outlier model actually ran
    let has_model_evaluated: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('telemetry') WHERE name='model_evaluated'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_model_evaluated == 0 {
        conn.execute(
            "ALTER TABLE telemetry ADD COLUMN model_evaluated INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (2)", [])?;

    Ok(())
}
