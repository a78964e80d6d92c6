//! On-disk series sources: CSV files and a SQLite daily-series store.
//!
//! Empty, `NaN`, and NULL cells load as the missing-value marker so the
//! aligner decides how to resolve them.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use crate::error::PipelineError;
use crate::features::FeatureTable;
use crate::series::TimeSeries;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const DAILY_SERIES_SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS daily_series (
        signal TEXT NOT NULL,
        day TEXT NOT NULL,
        value REAL,
        PRIMARY KEY(signal, day)
    ) WITHOUT ROWID;
";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{path}: missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("failed to parse {field} value '{value}' at record {record}")]
    ParseField {
        field: String,
        value: String,
        record: u64,
    },
    #[error(transparent)]
    Series(#[from] PipelineError),
}

/// Loads one value column of a CSV as a named series.
pub fn load_series_csv(
    path: &Path,
    date_column: &str,
    value_column: &str,
    signal: &str,
) -> Result<TimeSeries, SourceError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let date_idx = header_index(path, &headers, date_column)?;
    let value_idx = header_index(path, &headers, value_column)?;

    let mut points = Vec::new();
    for (record_idx, record) in reader.records().enumerate() {
        let record = record?;
        let record_no = record_idx as u64 + 1;
        let date = parse_date(&record, date_idx, date_column, record_no)?;
        let value = parse_cell(&record, value_idx, value_column, record_no)?;
        points.push((date, value));
    }

    let series = TimeSeries::new(signal, points)?;
    info!(
        component = "source",
        event = "source.csv.loaded",
        path = %path.display(),
        signal,
        points = series.len(),
        observed = series.observed_count()
    );
    Ok(series)
}

/// Loads every non-date column of a wide CSV as its own series, in file
/// column order.
pub fn load_wide_csv(path: &Path, date_column: &str) -> Result<Vec<TimeSeries>, SourceError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let date_idx = header_index(path, &headers, date_column)?;

    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, name)| *idx != date_idx && !name.trim().is_empty())
        .map(|(idx, name)| (idx, name.trim().to_string()))
        .collect();

    let mut points: Vec<Vec<(NaiveDate, f64)>> = vec![Vec::new(); value_columns.len()];
    for (record_idx, record) in reader.records().enumerate() {
        let record = record?;
        let record_no = record_idx as u64 + 1;
        let date = parse_date(&record, date_idx, date_column, record_no)?;
        for (slot, (idx, name)) in value_columns.iter().enumerate() {
            let value = parse_cell(&record, *idx, name, record_no)?;
            points[slot].push((date, value));
        }
    }

    let series = value_columns
        .into_iter()
        .zip(points)
        .map(|((_, name), points)| TimeSeries::new(name, points))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        component = "source",
        event = "source.csv.loaded",
        path = %path.display(),
        signal_count = series.len(),
        rows = series.first().map(TimeSeries::len).unwrap_or(0)
    );
    Ok(series)
}

pub fn load_series_sqlite(
    store_path: &Path,
    signal: &str,
    start: Option<NaiveDate>,
    end_inclusive: Option<NaiveDate>,
) -> Result<TimeSeries, SourceError> {
    let conn = Connection::open(store_path)?;
    let mut stmt = conn.prepare(
        "
        SELECT day, value
        FROM daily_series
        WHERE signal = ?1
          AND (?2 IS NULL OR day >= ?2)
          AND (?3 IS NULL OR day <= ?3)
        ORDER BY day ASC
        ",
    )?;

    let start = start.map(|d| d.format(DATE_FORMAT).to_string());
    let end = end_inclusive.map(|d| d.format(DATE_FORMAT).to_string());
    let mut rows = stmt.query(params![signal, start, end])?;

    let mut points = Vec::new();
    let mut record_no = 0u64;
    while let Some(row) = rows.next()? {
        record_no += 1;
        let raw_day: String = row.get(0)?;
        let value: Option<f64> = row.get(1)?;
        let date = NaiveDate::parse_from_str(&raw_day, DATE_FORMAT).map_err(|_| {
            SourceError::ParseField {
                field: "day".to_string(),
                value: raw_day.clone(),
                record: record_no,
            }
        })?;
        points.push((date, value.unwrap_or(f64::NAN)));
    }

    let series = TimeSeries::new(signal, points)?;
    info!(
        component = "source",
        event = "source.sqlite.loaded",
        store_path = %store_path.display(),
        signal,
        points = series.len(),
        observed = series.observed_count()
    );
    Ok(series)
}

/// Upserts a series into the store, writing missing markers as NULL.
pub fn store_series_sqlite(store_path: &Path, series: &TimeSeries) -> Result<(), SourceError> {
    let mut conn = Connection::open(store_path)?;
    conn.execute_batch(DAILY_SERIES_SCHEMA_SQL)?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO daily_series (signal, day, value) VALUES (?1, ?2, ?3)",
        )?;
        for (date, value) in series.points() {
            let value = value.is_finite().then_some(*value);
            stmt.execute(params![
                series.name(),
                date.format(DATE_FORMAT).to_string(),
                value
            ])?;
        }
    }
    tx.commit()?;

    info!(
        component = "source",
        event = "source.sqlite.stored",
        store_path = %store_path.display(),
        signal = series.name(),
        points = series.len()
    );
    Ok(())
}

/// Writes the merged feature table, `Date` first, for the external trainer.
pub fn write_feature_table_csv(path: &Path, table: &FeatureTable) -> Result<(), SourceError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["Date".to_string()];
    header.extend(table.schema().columns().iter().cloned());
    writer.write_record(&header)?;

    for (date, row) in table.dates().iter().zip(table.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(date.format(DATE_FORMAT).to_string());
        record.extend(row.iter().map(|value| value.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        component = "source",
        event = "source.features.written",
        path = %path.display(),
        rows = table.len(),
        fingerprint = table.schema().fingerprint()
    );
    Ok(())
}

fn header_index(path: &Path, headers: &StringRecord, column: &str) -> Result<usize, SourceError> {
    headers
        .iter()
        .position(|name| name.trim() == column)
        .ok_or_else(|| SourceError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

fn parse_date(
    record: &StringRecord,
    idx: usize,
    field: &str,
    record_no: u64,
) -> Result<NaiveDate, SourceError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    // Timestamped exports carry a time suffix after the calendar day.
    let day = match raw.as_bytes().get(10) {
        Some(b' ' | b'T') => &raw[..10],
        _ => raw,
    };
    NaiveDate::parse_from_str(day, DATE_FORMAT).map_err(|_| SourceError::ParseField {
        field: field.to_string(),
        value: raw.to_string(),
        record: record_no,
    })
}

fn parse_cell(
    record: &StringRecord,
    idx: usize,
    field: &str,
    record_no: u64,
) -> Result<f64, SourceError> {
    let raw = record.get(idx).unwrap_or_default().trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null") {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>().map_err(|_| SourceError::ParseField {
        field: field.to_string(),
        value: raw.to_string(),
        record: record_no,
    })
}
