//! Recursive multi-step forecasting.
//!
//! Each step feeds the model's prediction back as the primary value of a
//! synthetic next-day row. Secondary signals (macro, sentiment, derived) are
//! carried forward unchanged from the last known row: no source exists to
//! update them, so later steps rest on an increasingly stale macro picture
//! and compound the model's own error. Callers should treat higher
//! `horizon_index` values as lower confidence.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ModelError, PipelineError};
use crate::features::Scaler;
use crate::window::Window;

/// Named forecast ranges in trading steps.
pub const FORECAST_RANGES: [(&str, usize); 7] = [
    ("1 Day", 1),
    ("1 Week", 5),
    ("2 Weeks", 10),
    ("1 Month", 21),
    ("3 Months", 63),
    ("6 Months", 126),
    ("1 Year", 252),
];

/// Trained single-step model.
///
/// `predict_next` returns the next primary value in normalized units and must
/// be deterministic for identical windows.
pub trait Predictor {
    fn predict_next(&self, window: &Window) -> Result<f64, ModelError>;
}

impl<F> Predictor for F
where
    F: Fn(&Window) -> Result<f64, ModelError>,
{
    fn predict_next(&self, window: &Window) -> Result<f64, ModelError> {
        self(window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastCalendar {
    /// Every calendar day (crypto).
    Daily,
    /// Monday through Friday (exchange-traded assets).
    #[default]
    Weekdays,
}

impl ForecastCalendar {
    pub fn next_date(self, date: NaiveDate) -> Option<NaiveDate> {
        let mut next = date.succ_opt()?;
        if self == Self::Weekdays {
            while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
                next = next.succ_opt()?;
            }
        }
        Some(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub horizon_index: usize,
    pub date: NaiveDate,
    pub value: f64,
}

/// Native-unit forecast, `horizon_index` running 1..=len.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    signal: String,
    anchor_date: NaiveDate,
    points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Last date with real data before the first forecast step.
    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor_date
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.value).collect()
    }

    pub fn point(&self, horizon_index: usize) -> Option<&ForecastPoint> {
        horizon_index
            .checked_sub(1)
            .and_then(|idx| self.points.get(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeForecast {
    pub label: String,
    pub point: ForecastPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub current: f64,
    pub predicted: f64,
    pub change: f64,
    pub pct_change: f64,
    pub direction: Direction,
    pub date: NaiveDate,
}

pub fn forecast<P, S>(
    model: &P,
    scaler: &S,
    initial_window: &Window,
    horizon: usize,
    calendar: ForecastCalendar,
) -> Result<ForecastSeries, PipelineError>
where
    P: Predictor + ?Sized,
    S: Scaler + ?Sized,
{
    let signal = initial_window.signal().to_string();
    let anchor_date = initial_window.end_date();
    if horizon == 0 {
        return Err(PipelineError::InvalidHorizon {
            signal,
            horizon,
            after: anchor_date,
        });
    }
    if scaler.schema_fingerprint() != initial_window.schema().fingerprint() {
        return Err(PipelineError::SchemaMismatch {
            signal,
            detail: format!(
                "window schema {} does not match scaler schema {}",
                initial_window.schema().fingerprint(),
                scaler.schema_fingerprint()
            ),
            range: None,
        });
    }

    info!(
        component = "forecast",
        event = "forecast.start",
        signal = %signal,
        anchor_date = %anchor_date,
        horizon,
        lookback = initial_window.len(),
        calendar = ?calendar
    );

    let primary = initial_window.schema().primary_index();
    let mut window = initial_window.clone();
    let mut dates = Vec::with_capacity(horizon);
    let mut scaled = Vec::with_capacity(horizon);

    for step in 1..=horizon {
        let date = calendar
            .next_date(window.end_date())
            .ok_or_else(|| PipelineError::InvalidHorizon {
                signal: signal.clone(),
                horizon,
                after: anchor_date,
            })?;

        let predicted = model
            .predict_next(&window)
            .and_then(|value| {
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(ModelError::from(format!("model returned non-finite value {value}")))
                }
            })
            .map_err(|source| {
                warn!(
                    component = "forecast",
                    event = "forecast.step.failed",
                    signal = %signal,
                    step,
                    date = %date,
                    error = %source
                );
                PipelineError::ModelInferenceError {
                    signal: signal.clone(),
                    step,
                    date,
                    source,
                }
            })?;

        debug!(
            component = "forecast",
            event = "forecast.step",
            signal = %signal,
            step,
            date = %date,
            scaled_value = predicted
        );

        let mut next_row = window.last_row().to_vec();
        next_row[primary] = predicted;
        window = window.advance(next_row, date);
        dates.push(date);
        scaled.push(predicted);
    }

    let native = scaler.denormalize_primary(&scaled);
    if native.len() != horizon {
        warn!(
            component = "forecast",
            event = "forecast.denormalize.length_mismatch",
            signal = %signal,
            anchor_date = %anchor_date,
            horizon,
            returned = native.len()
        );
        return Err(PipelineError::SchemaMismatch {
            signal,
            detail: format!(
                "scaler returned {} values for a {horizon}-step forecast after {anchor_date}",
                native.len()
            ),
            range: None,
        });
    }
    let mut points = Vec::with_capacity(horizon);
    for (idx, (date, value)) in dates.into_iter().zip(native).enumerate() {
        let step = idx + 1;
        if !value.is_finite() {
            return Err(PipelineError::NonFiniteForecast {
                signal,
                step,
                date,
                value,
            });
        }
        points.push(ForecastPoint {
            horizon_index: step,
            date,
            value,
        });
    }

    info!(
        component = "forecast",
        event = "forecast.finish",
        signal = %signal,
        point_count = points.len(),
        last_date = ?points.last().map(|point| point.date)
    );

    Ok(ForecastSeries {
        signal,
        anchor_date,
        points,
    })
}

/// Picks the point at each named range out of one finished forecast.
pub fn select_ranges(
    series: &ForecastSeries,
    ranges: &[(&str, usize)],
) -> Result<Vec<RangeForecast>, PipelineError> {
    ranges
        .iter()
        .map(|(label, steps)| {
            series
                .point(*steps)
                .map(|point| RangeForecast {
                    label: label.to_string(),
                    point: *point,
                })
                .ok_or_else(|| PipelineError::InvalidHorizon {
                    signal: series.signal().to_string(),
                    horizon: *steps,
                    after: series.anchor_date(),
                })
        })
        .collect()
}

/// Largest step any of `ranges` needs.
pub fn max_range_steps(ranges: &[(&str, usize)]) -> usize {
    ranges.iter().map(|(_, steps)| *steps).max().unwrap_or(0)
}

/// Compares the first forecast step with the last real close.
pub fn summarize_next_day(
    current: f64,
    series: &ForecastSeries,
) -> Result<ForecastSummary, PipelineError> {
    let first = series.point(1).ok_or_else(|| PipelineError::InvalidHorizon {
        signal: series.signal().to_string(),
        horizon: 0,
        after: series.anchor_date(),
    })?;
    if !current.is_finite() || current <= 0.0 {
        return Err(PipelineError::InvalidSeries {
            signal: series.signal().to_string(),
            reason: format!(
                "last close {current} on {} must be a positive price",
                series.anchor_date()
            ),
        });
    }

    let change = first.value - current;
    Ok(ForecastSummary {
        current,
        predicted: first.value,
        change,
        pct_change: change / current * 100.0,
        direction: if change > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        },
        date: first.date,
    })
}
