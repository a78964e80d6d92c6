//! Aligns primary price, macro, and sentiment series onto one calendar.
//!
//! Fill policy for secondary columns is forward-fill first, then backward-fill
//! for whatever is still missing at the start. Any column that stays empty is a
//! hard `DataUnavailable` failure; no cell is ever defaulted.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::series::{DateRange, TimeSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    Inner,
    #[default]
    LeftOnPrimary,
}

/// Fully populated table, primary column first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedTable {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl AlignedTable {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn primary(&self) -> &str {
        &self.columns[0]
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn range(&self) -> Option<DateRange> {
        DateRange::of(&self.dates)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFillReport {
    pub signal: String,
    pub observed: usize,
    pub forward_filled: usize,
    pub backward_filled: usize,
    pub last_observed: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignReport {
    pub join_mode: JoinMode,
    pub primary_points: usize,
    pub output_rows: usize,
    pub leading_primary_dropped: usize,
    pub inner_join_dropped: usize,
    pub range: Option<DateRange>,
    pub signals: Vec<SignalFillReport>,
}

impl AlignReport {
    pub fn signal(&self, name: &str) -> Option<&SignalFillReport> {
        self.signals.iter().find(|report| report.signal == name)
    }

    pub fn total_filled(&self) -> usize {
        self.signals
            .iter()
            .map(|report| report.forward_filled + report.backward_filled)
            .sum()
    }
}

pub fn align(
    primary: &TimeSeries,
    secondary: &[TimeSeries],
    join_mode: JoinMode,
) -> Result<(AlignedTable, AlignReport), PipelineError> {
    validate_names(primary, secondary)?;

    info!(
        component = "align",
        event = "align.start",
        primary = primary.name(),
        primary_points = primary.len(),
        secondary_count = secondary.len(),
        join_mode = ?join_mode
    );

    let (mut dates, mut primary_values, primary_report, leading_dropped) =
        resolve_primary(primary)?;

    let lookups: Vec<HashMap<NaiveDate, f64>> = secondary.iter().map(finite_lookup).collect();

    let mut inner_join_dropped = 0;
    if join_mode == JoinMode::Inner {
        for (series, lookup) in secondary.iter().zip(&lookups) {
            let before = dates.len();
            let keep: Vec<bool> = dates.iter().map(|d| lookup.contains_key(d)).collect();
            dates = retain_flagged(&dates, &keep);
            primary_values = retain_flagged(&primary_values, &keep);
            inner_join_dropped += before - dates.len();
            if dates.is_empty() {
                return Err(PipelineError::DataUnavailable {
                    signal: series.name().to_string(),
                    range: primary.range(),
                });
            }
        }
    }

    let range = DateRange::of(&dates);
    let mut columns = Vec::with_capacity(secondary.len() + 1);
    let mut reports = Vec::with_capacity(secondary.len() + 1);
    columns.push(primary_values);
    reports.push(primary_report);

    for (series, lookup) in secondary.iter().zip(&lookups) {
        let raw: Vec<Option<f64>> = dates.iter().map(|d| lookup.get(d).copied()).collect();
        let (values, report) = fill_secondary(series.name(), &dates, raw, range)?;
        columns.push(values);
        reports.push(report);
    }

    let rows = (0..dates.len())
        .map(|row| columns.iter().map(|column| column[row]).collect())
        .collect();
    let mut names = Vec::with_capacity(secondary.len() + 1);
    names.push(primary.name().to_string());
    names.extend(secondary.iter().map(|s| s.name().to_string()));

    let report = AlignReport {
        join_mode,
        primary_points: primary.len(),
        output_rows: dates.len(),
        leading_primary_dropped: leading_dropped,
        inner_join_dropped,
        range,
        signals: reports,
    };

    info!(
        component = "align",
        event = "align.finish",
        primary = primary.name(),
        output_rows = report.output_rows,
        leading_primary_dropped = report.leading_primary_dropped,
        inner_join_dropped = report.inner_join_dropped,
        filled_cells = report.total_filled()
    );

    Ok((
        AlignedTable {
            dates,
            columns: names,
            rows,
        },
        report,
    ))
}

fn validate_names(primary: &TimeSeries, secondary: &[TimeSeries]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    seen.insert(primary.name());
    for series in secondary {
        if !seen.insert(series.name()) {
            return Err(PipelineError::SchemaMismatch {
                signal: series.name().to_string(),
                detail: "signal supplied more than once".to_string(),
                range: series.range(),
            });
        }
    }
    Ok(())
}

/// Forward-fills the primary column and drops leading rows with no prior
/// observation. The primary is never backward-filled.
fn resolve_primary(
    primary: &TimeSeries,
) -> Result<(Vec<NaiveDate>, Vec<f64>, SignalFillReport, usize), PipelineError> {
    let mut dates = Vec::with_capacity(primary.len());
    let mut values = Vec::with_capacity(primary.len());
    let mut last_known: Option<f64> = None;
    let mut last_observed = None;
    let mut leading_dropped = 0;
    let mut forward_filled = 0;

    for (date, value) in primary.points() {
        if value.is_finite() {
            last_known = Some(*value);
            last_observed = Some(*date);
            dates.push(*date);
            values.push(*value);
            continue;
        }
        match last_known {
            Some(prev) => {
                forward_filled += 1;
                dates.push(*date);
                values.push(prev);
            }
            None => leading_dropped += 1,
        }
    }

    if dates.is_empty() {
        return Err(PipelineError::DataUnavailable {
            signal: primary.name().to_string(),
            range: primary.range(),
        });
    }

    let report = SignalFillReport {
        signal: primary.name().to_string(),
        observed: primary.observed_count(),
        forward_filled,
        backward_filled: 0,
        last_observed,
    };
    Ok((dates, values, report, leading_dropped))
}

fn fill_secondary(
    signal: &str,
    dates: &[NaiveDate],
    mut raw: Vec<Option<f64>>,
    range: Option<DateRange>,
) -> Result<(Vec<f64>, SignalFillReport), PipelineError> {
    let observed = raw.iter().filter(|cell| cell.is_some()).count();
    if observed == 0 {
        return Err(PipelineError::DataUnavailable {
            signal: signal.to_string(),
            range,
        });
    }
    let last_observed = raw
        .iter()
        .rposition(|cell| cell.is_some())
        .map(|idx| dates[idx]);

    let forward_filled = forward_fill(&mut raw);
    let backward_filled = backward_fill(&mut raw);

    if last_observed != dates.last().copied() {
        warn!(
            component = "align",
            event = "align.trailing_fill",
            signal,
            last_observed = ?last_observed,
            table_end = ?dates.last()
        );
    }

    let mut values = Vec::with_capacity(raw.len());
    for (idx, cell) in raw.into_iter().enumerate() {
        match cell {
            Some(value) => values.push(value),
            None => {
                return Err(PipelineError::DataUnavailable {
                    signal: signal.to_string(),
                    range: Some(DateRange {
                        first: dates[idx],
                        last: dates[idx],
                    }),
                })
            }
        }
    }

    Ok((
        values,
        SignalFillReport {
            signal: signal.to_string(),
            observed,
            forward_filled,
            backward_filled,
            last_observed,
        },
    ))
}

fn forward_fill(cells: &mut [Option<f64>]) -> usize {
    let mut filled = 0;
    let mut last = None;
    for cell in cells.iter_mut() {
        match cell {
            Some(value) => last = Some(*value),
            None => {
                if let Some(prev) = last {
                    *cell = Some(prev);
                    filled += 1;
                }
            }
        }
    }
    filled
}

fn backward_fill(cells: &mut [Option<f64>]) -> usize {
    let mut filled = 0;
    let mut next = None;
    for cell in cells.iter_mut().rev() {
        match cell {
            Some(value) => next = Some(*value),
            None => {
                if let Some(following) = next {
                    *cell = Some(following);
                    filled += 1;
                }
            }
        }
    }
    filled
}

fn finite_lookup(series: &TimeSeries) -> HashMap<NaiveDate, f64> {
    series
        .points()
        .iter()
        .filter(|(_, value)| value.is_finite())
        .copied()
        .collect()
}

fn retain_flagged<T: Copy>(items: &[T], keep: &[bool]) -> Vec<T> {
    items
        .iter()
        .zip(keep)
        .filter(|(_, keep)| **keep)
        .map(|(item, _)| *item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_fill_runs_before_backward_fill() {
        let mut cells = vec![None, Some(1.0), None, Some(3.0), None];
        assert_eq!(forward_fill(&mut cells), 2);
        assert_eq!(cells, vec![None, Some(1.0), Some(1.0), Some(3.0), Some(3.0)]);
        assert_eq!(backward_fill(&mut cells), 1);
        assert_eq!(cells[0], Some(1.0));
    }

    #[test]
    fn backward_fill_alone_would_leave_the_tail_open() {
        let mut cells = vec![Some(1.0), None];
        assert_eq!(backward_fill(&mut cells), 0);
        assert_eq!(cells[1], None);
    }

    #[test]
    fn retain_flagged_keeps_order() {
        assert_eq!(
            retain_flagged(&[1, 2, 3, 4], &[true, false, true, true]),
            vec![1, 3, 4]
        );
    }
}
