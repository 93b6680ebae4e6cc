//! SQLite Tick Store
//!
//! Append-only tick storage on an embedded SQLite database. One connection is
//! guarded by a single mutex which is held for exactly one statement, so a
//! read never observes a half-written insert and no lock is ever held across
//! an await point.
//!
//! # Schema
//!
//! ```sql
//! ticks(id INTEGER PRIMARY KEY AUTOINCREMENT,
//!       symbol TEXT, ts_ms INTEGER, price REAL, size REAL,
//!       inserted_at_ms INTEGER)
//! ```
//!
//! Reads are ordered by exchange timestamp, oldest first, with `id` breaking
//! ties. Backfilled history therefore sorts before live ticks even though it
//! is inserted after them.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::application::ports::{StoreError, TickRepository};
use crate::domain::tick::{Tick, normalize_symbol};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    price REAL NOT NULL,
    size REAL NOT NULL,
    inserted_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts ON ticks(symbol, ts_ms);
CREATE INDEX IF NOT EXISTS idx_ticks_inserted_at ON ticks(inserted_at_ms);
";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Raw column values before validation.
type TickRow = (i64, String, i64, f64, f64);

/// Embedded tick store.
pub struct TickStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for TickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickStore").finish_non_exhaustive()
    }
}

impl TickStore {
    /// Open (or create) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "Tick store opened");
        Self::with_connection(conn)
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_ticks(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Tick>, StoreError> {
        let rows: Vec<TickRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(sql)?;
            let mapped = stmt.query_map(params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        rows.into_iter().map(row_to_tick).collect()
    }
}

fn row_to_tick((id, symbol, ts_ms, price, size): TickRow) -> Result<Tick, StoreError> {
    Tick::from_millis(symbol, ts_ms, price, size).map_err(|e| StoreError::CorruptRow {
        id,
        reason: e.to_string(),
    })
}

impl TickRepository for TickStore {
    fn insert(&self, tick: &Tick) -> Result<(), StoreError> {
        let inserted_at = Utc::now().timestamp_millis();
        self.conn.lock().execute(
            "INSERT INTO ticks (symbol, ts_ms, price, size, inserted_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tick.symbol(),
                tick.timestamp_ms(),
                tick.price(),
                tick.size(),
                inserted_at
            ],
        )?;
        Ok(())
    }

    fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut ticks = self.query_ticks(
            "SELECT id, symbol, ts_ms, price, size FROM ticks \
             WHERE symbol = ?1 ORDER BY ts_ms DESC, id DESC LIMIT ?2",
            params![normalize_symbol(symbol), limit],
        )?;
        ticks.reverse();
        Ok(ticks)
    }

    fn range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        self.query_ticks(
            "SELECT id, symbol, ts_ms, price, size FROM ticks \
             WHERE symbol = ?1 AND ts_ms >= ?2 AND ts_ms <= ?3 ORDER BY ts_ms, id",
            params![
                normalize_symbol(symbol),
                start.timestamp_millis(),
                end.timestamp_millis()
            ],
        )
    }

    fn count(&self, symbol: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM ticks WHERE symbol = ?1",
            params![normalize_symbol(symbol)],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn purge(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM ticks WHERE inserted_at_ms < ?1",
            params![older_than.timestamp_millis()],
        )?;
        Ok(removed)
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT symbol FROM ticks ORDER BY symbol")?;
        let symbols = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }
}
