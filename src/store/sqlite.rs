//! SQLite-backed store.

use super::{StoreError, TelemetryStore};
use crate::core::StatusEvent;
use crate::telemetry::{LineState, TelemetryPacket};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS pulses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    line_id TEXT NOT NULL,
    pulses INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pulses_line_ts ON pulses(line_id, timestamp);

CREATE TABLE IF NOT EXISTS status_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    line_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    is_running INTEGER NOT NULL,
    product TEXT
);
CREATE INDEX IF NOT EXISTS idx_status_log_line_ts ON status_log(line_id, timestamp);

CREATE TABLE IF NOT EXISTS minute_stats (
    line_id TEXT NOT NULL,
    minute INTEGER NOT NULL,
    speed REAL NOT NULL,
    PRIMARY KEY (line_id, minute)
);
";

/// Store on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            conn.execute_batch(SCHEMA_V1)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    /// Number of raw packets logged for a line.
    pub fn packet_count(&self, line_id: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM pulses WHERE line_id = ?1",
            [line_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn event_from_row(line_id: &str, row: &Row<'_>) -> rusqlite::Result<StatusEvent> {
    let timestamp: i64 = row.get(0)?;
    let is_running: i64 = row.get(1)?;
    let product: Option<String> = row.get(2)?;
    Ok(StatusEvent::new(line_id, timestamp, LineState::from_running(is_running != 0))
        .with_product(product))
}

impl TelemetryStore for SqliteStore {
    fn append_packet(&self, line_id: &str, packet: &TelemetryPacket) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO pulses (line_id, pulses, duration_ms, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                line_id,
                to_sql_int(packet.pulses),
                to_sql_int(packet.duration_ms),
                packet.timestamp
            ],
        )?;
        Ok(())
    }

    fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO status_log (line_id, timestamp, is_running, product) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.line_id,
                event.timestamp,
                i64::from(event.state.is_running()),
                event.product
            ],
        )?;
        Ok(())
    }

    fn status_events(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusEvent>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "
            SELECT timestamp, is_running, product
            FROM status_log
            WHERE line_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
            ORDER BY timestamp ASC, id ASC
            ",
        )?;
        let rows = statement.query_map(params![line_id, from, to], |row| {
            event_from_row(line_id, row)
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    fn last_status_before(
        &self,
        line_id: &str,
        before: i64,
    ) -> Result<Option<StatusEvent>, StoreError> {
        let event = self
            .conn()?
            .query_row(
                "
                SELECT timestamp, is_running, product
                FROM status_log
                WHERE line_id = ?1 AND timestamp < ?2
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
                ",
                params![line_id, before],
                |row| event_from_row(line_id, row),
            )
            .optional()?;
        Ok(event)
    }

    fn upsert_minute(&self, line_id: &str, minute: i64, average: f64) -> Result<(), StoreError> {
        self.conn()?.execute(
            "
            INSERT INTO minute_stats (line_id, minute, speed) VALUES (?1, ?2, ?3)
            ON CONFLICT(line_id, minute) DO UPDATE SET speed = excluded.speed
            ",
            params![line_id, minute, average],
        )?;
        Ok(())
    }

    fn minute_averages(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "
            SELECT minute, speed
            FROM minute_stats
            WHERE line_id = ?1 AND minute >= ?2 AND minute <= ?3
            ORDER BY minute ASC
            ",
        )?;
        let rows = statement.query_map(params![line_id, from, to], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut averages = Vec::new();
        for row in rows {
            averages.push(row?);
        }
        Ok(averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrate_sets_schema_version() {
        let store = store();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        // Idempotent
        store.migrate().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_status_events_inclusive_range() {
        let store = store();
        for (ts, running) in [(100, true), (200, false), (300, true)] {
            store
                .append_status_event(&StatusEvent::new(
                    "line1",
                    ts,
                    LineState::from_running(running),
                ))
                .unwrap();
        }
        store
            .append_status_event(&StatusEvent::new("line2", 150, LineState::Running))
            .unwrap();

        let events = store.status_events("line1", 100, 200).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 100);
        assert_eq!(events[1].state, LineState::Stopped);
    }

    #[test]
    fn test_last_status_before_keeps_product() {
        let store = store();
        let event = StatusEvent::new("line1", 100, LineState::Running)
            .with_product(Some("PE pipe 20mm".to_string()));
        store.append_status_event(&event).unwrap();

        assert_eq!(store.last_status_before("line1", 100).unwrap(), None);
        let last = store.last_status_before("line1", 101).unwrap().unwrap();
        assert_eq!(last, event);
    }

    #[test]
    fn test_upsert_minute_replaces_value() {
        let store = store();
        store.upsert_minute("line1", 60, 10.0).unwrap();
        store.upsert_minute("line1", 60, 12.0).unwrap();
        store.upsert_minute("line1", 120, 5.0).unwrap();

        let averages = store.minute_averages("line1", 0, 120).unwrap();
        assert_eq!(averages, vec![(60, 12.0), (120, 5.0)]);
    }

    #[test]
    fn test_append_packet() {
        let store = store();
        store
            .append_packet("line1", &TelemetryPacket::new(5, 1_000, 10))
            .unwrap();
        assert_eq!(store.packet_count("line1").unwrap(), 1);
        assert_eq!(store.packet_count("line2").unwrap(), 0);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_minute("line1", 60, 1.0).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.minute_averages("line1", 0, 60).unwrap().len(), 1);
    }
}
