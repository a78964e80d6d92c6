//! Daily time series as delivered by price, macro, and sentiment collaborators.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateRange {
    pub fn of(dates: &[NaiveDate]) -> Option<Self> {
        Some(Self {
            first: *dates.first()?,
            last: *dates.last()?,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

pub(crate) fn describe_range(range: &Option<DateRange>) -> String {
    match range {
        Some(range) => range.to_string(),
        None => "an empty date range".to_string(),
    }
}

/// One signal's (date, value) observations.
///
/// Dates are strictly increasing. A non-finite value is the collaborator's
/// missing-value marker; the aligner resolves or rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    name: String,
    points: Vec<(NaiveDate, f64)>,
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        points: Vec<(NaiveDate, f64)>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::InvalidSeries {
                signal: name,
                reason: "signal name must not be empty".to_string(),
            });
        }

        for pair in points.windows(2) {
            let (prev, next) = (pair[0].0, pair[1].0);
            if next == prev {
                return Err(PipelineError::InvalidSeries {
                    signal: name,
                    reason: format!("duplicate date {next}"),
                });
            }
            if next < prev {
                return Err(PipelineError::InvalidSeries {
                    signal: name,
                    reason: format!("date {next} follows {prev}; dates must be ascending"),
                });
            }
        }

        Ok(Self { name, points })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|(date, _)| *date)
    }

    pub fn range(&self) -> Option<DateRange> {
        Some(DateRange {
            first: self.points.first()?.0,
            last: self.points.last()?.0,
        })
    }

    /// Number of dates carrying a finite value.
    pub fn observed_count(&self) -> usize {
        self.points.iter().filter(|(_, v)| v.is_finite()).count()
    }

    /// Finite value recorded on `date`, if any.
    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        let idx = self
            .points
            .binary_search_by_key(&date, |(d, _)| *d)
            .ok()?;
        let value = self.points[idx].1;
        value.is_finite().then_some(value)
    }

    pub fn renamed(&self, name: impl Into<String>) -> Result<Self, PipelineError> {
        Self::new(name, self.points.clone())
    }
}

/// Collapses per-article sentiment scores into one mean score per day.
///
/// Non-finite scores are discarded; a day whose scores are all discarded is
/// omitted rather than reported as zero.
pub fn daily_mean_scores(
    name: impl Into<String>,
    scored: &[(NaiveDate, f64)],
) -> Result<TimeSeries, PipelineError> {
    let mut by_day: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, score) in scored {
        if !score.is_finite() {
            continue;
        }
        let entry = by_day.entry(*date).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    let points = by_day
        .into_iter()
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect();
    TimeSeries::new(name, points)
}
