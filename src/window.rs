//! Fixed-length lookback windows over a normalized feature table.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::error::PipelineError;
use crate::features::{FeatureSchema, NormalizedTable};

/// `len()` consecutive normalized rows ending at `end_date`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    schema: Arc<FeatureSchema>,
    end_date: NaiveDate,
    rows: Vec<Vec<f64>>,
}

impl Window {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn signal(&self) -> &str {
        self.schema.primary()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.schema.width()
    }

    pub fn last_row(&self) -> &[f64] {
        self.rows.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Row-major copy, shaped `[len, width]`, for model input buffers.
    pub fn flatten(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }

    /// Drops the oldest row and appends `row` dated `date`.
    pub(crate) fn advance(&self, row: Vec<f64>, date: NaiveDate) -> Window {
        let mut rows = Vec::with_capacity(self.rows.len());
        rows.extend(self.rows.iter().skip(1).cloned());
        rows.push(row);
        Window {
            schema: Arc::clone(&self.schema),
            end_date: date,
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub window: Window,
    pub target: f64,
    pub target_date: NaiveDate,
}

/// Supervised samples whose window and target both precede `split_at`.
///
/// `split_at` is the first holdout row index when a validation tail is
/// reserved; `None` uses the whole table.
pub fn make_training_windows(
    table: &NormalizedTable,
    lookback: usize,
    split_at: Option<usize>,
) -> Result<Vec<TrainingSample>, PipelineError> {
    validate_lookback(lookback)?;
    let end = match split_at {
        Some(split) => {
            validate_split(table, split)?;
            split
        }
        None => table.len(),
    };

    if end < lookback + 1 {
        return Err(insufficient(table, lookback + 1, end));
    }

    let samples = samples_for_targets(table, lookback, lookback..end);
    info!(
        component = "window",
        event = "window.training.built",
        primary = table.schema().primary(),
        lookback,
        split_at = ?split_at,
        sample_count = samples.len()
    );
    Ok(samples)
}

/// Samples whose target falls in the holdout tail starting at `split_at`.
pub fn make_validation_windows(
    table: &NormalizedTable,
    lookback: usize,
    split_at: usize,
) -> Result<Vec<TrainingSample>, PipelineError> {
    validate_lookback(lookback)?;
    validate_split(table, split_at)?;

    let start = split_at.max(lookback);
    if start >= table.len() {
        return Err(insufficient(table, start + 1, table.len()));
    }

    Ok(samples_for_targets(table, lookback, start..table.len()))
}

/// The final `lookback` rows, for inference.
pub fn make_latest_window(
    table: &NormalizedTable,
    lookback: usize,
) -> Result<Window, PipelineError> {
    validate_lookback(lookback)?;
    if table.len() < lookback {
        return Err(insufficient(table, lookback, table.len()));
    }
    Ok(window_ending_before(table, lookback, table.len()))
}

fn samples_for_targets(
    table: &NormalizedTable,
    lookback: usize,
    targets: std::ops::Range<usize>,
) -> Vec<TrainingSample> {
    let primary = table.schema().primary_index();
    targets
        .map(|target| TrainingSample {
            window: window_ending_before(table, lookback, target),
            target: table.rows()[target][primary],
            target_date: table.dates()[target],
        })
        .collect()
}

fn window_ending_before(table: &NormalizedTable, lookback: usize, end: usize) -> Window {
    Window {
        schema: Arc::clone(table.schema()),
        end_date: table.dates()[end - 1],
        rows: table.rows()[end - lookback..end].to_vec(),
    }
}

fn validate_lookback(lookback: usize) -> Result<(), PipelineError> {
    if lookback == 0 {
        return Err(PipelineError::InvalidConfig(
            "lookback length must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_split(table: &NormalizedTable, split_at: usize) -> Result<(), PipelineError> {
    if split_at > table.len() {
        return Err(PipelineError::InvalidConfig(format!(
            "split point {split_at} is past the end of a {}-row table",
            table.len()
        )));
    }
    Ok(())
}

fn insufficient(table: &NormalizedTable, required: usize, available: usize) -> PipelineError {
    PipelineError::InsufficientHistory {
        signal: table.schema().primary().to_string(),
        required,
        available,
        range: table.range(),
    }
}
