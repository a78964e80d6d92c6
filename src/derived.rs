//! Calendar-derived signals computed from the primary date axis.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::series::TimeSeries;

pub const HALVING_CYCLE_SIGNAL: &str = "Halving_Cycle";

/// Bitcoin block-reward halvings; the last entry is an estimate.
const HALVING_DATES: [(i32, u32, u32); 5] = [
    (2012, 11, 28),
    (2016, 7, 9),
    (2020, 5, 11),
    (2024, 4, 19),
    (2028, 4, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedSignal {
    HalvingCycle,
}

impl DerivedSignal {
    pub fn name(self) -> &'static str {
        match self {
            Self::HalvingCycle => HALVING_CYCLE_SIGNAL,
        }
    }

    pub fn build(self, dates: &[NaiveDate]) -> Result<TimeSeries, PipelineError> {
        match self {
            Self::HalvingCycle => halving_cycle_series(dates),
        }
    }
}

/// Days between `date` and the nearest halving, past or future.
pub fn days_to_nearest_halving(date: NaiveDate) -> i64 {
    HALVING_DATES
        .iter()
        .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(*y, *m, *d))
        .map(|halving| (date - halving).num_days().abs())
        .min()
        .unwrap_or(0)
}

pub fn halving_cycle_series(dates: &[NaiveDate]) -> Result<TimeSeries, PipelineError> {
    let points = dates
        .iter()
        .map(|date| (*date, days_to_nearest_halving(*date) as f64))
        .collect();
    TimeSeries::new(HALVING_CYCLE_SIGNAL, points)
}
