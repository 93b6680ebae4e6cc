//! CSV Backfill Reader
//!
//! Reads OHLCV bars (`time,open,high,low,close,volume`) for import into the
//! tick store. Column order is free and extra columns are ignored, but all
//! six must be present. Bad rows are reported individually and never abort
//! the batch.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::domain::candle::OhlcvRow;

/// Columns a backfill file must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = ["time", "open", "high", "low", "close", "volume"];

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Errors that reject a whole file.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// The file could not be opened.
    #[error("failed to open backfill file: {0}")]
    Io(#[from] std::io::Error),

    /// The header could not be read.
    #[error("failed to read CSV header: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the header.
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
}

/// A row that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// 1-based line number in the file (the header is line 1).
    pub line: u64,
    /// Why the row was rejected.
    pub reason: String,
}

/// Parsed rows plus the ones that were rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillBatch {
    /// Usable rows in file order.
    pub rows: Vec<OhlcvRow>,
    /// Rejected rows.
    pub rejected: Vec<RowRejection>,
}

/// Read a backfill file from disk.
///
/// # Errors
///
/// Returns [`BackfillError`] if the file cannot be opened or its header is
/// missing a required column.
pub fn read_ohlcv_file(path: impl AsRef<Path>) -> Result<BackfillBatch, BackfillError> {
    let file = File::open(path.as_ref())?;
    read_ohlcv(file)
}

/// Read backfill rows from any reader.
///
/// # Errors
///
/// Returns [`BackfillError`] if the header cannot be read or is missing a
/// required column.
pub fn read_ohlcv<R: Read>(reader: R) -> Result<BackfillBatch, BackfillError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut columns = [0usize; 6];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or(BackfillError::MissingColumn(name))?;
    }

    let mut batch = BackfillBatch::default();
    for (index, record) in reader.records().enumerate() {
        let line = record
            .as_ref()
            .ok()
            .and_then(|r| r.position())
            .map_or(index as u64 + 2, csv::Position::line);

        match record
            .map_err(|e| e.to_string())
            .and_then(|r| parse_row(&r, &columns))
        {
            Ok(row) => batch.rows.push(row),
            Err(reason) => batch.rejected.push(RowRejection { line, reason }),
        }
    }

    if !batch.rejected.is_empty() {
        tracing::warn!(
            rejected = batch.rejected.len(),
            accepted = batch.rows.len(),
            "Backfill rows rejected"
        );
    }
    Ok(batch)
}

fn parse_row(record: &csv::StringRecord, columns: &[usize; 6]) -> Result<OhlcvRow, String> {
    let field = |i: usize| {
        record
            .get(columns[i])
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing value for {}", REQUIRED_COLUMNS[i]))
    };
    let number = |i: usize| -> Result<f64, String> {
        let raw = field(i)?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid {}: {raw}", REQUIRED_COLUMNS[i]))
    };

    let raw_time = field(0)?;
    let time = parse_time(raw_time).ok_or_else(|| format!("invalid time: {raw_time}"))?;

    Ok(OhlcvRow {
        time,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
    })
}

/// Parse RFC 3339 or naive ISO-8601 (taken as UTC).
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}
