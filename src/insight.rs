//! Coarse classification of a finished native-unit forecast.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::forecast::ForecastSeries;

const TREND_THRESHOLD_PCT: f64 = 2.0;
const STRONG_MOVE_PCT: f64 = 15.0;
const MODERATE_MOVE_PCT: f64 = 5.0;
const HIGH_VOLATILITY: f64 = 0.03;
const MEDIUM_VOLATILITY: f64 = 0.015;
const HIGH_RISK_MOVE_PCT: f64 = 20.0;
const MEDIUM_RISK_MOVE_PCT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

/// Shared scale for volatility and risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastInsight {
    pub signal: String,
    pub trend: Trend,
    pub strength: Strength,
    pub volatility: Level,
    pub risk: Level,
    pub change_pct: f64,
    pub final_value: f64,
    /// Population std-dev of step-to-step returns across the forecast.
    pub step_volatility: f64,
}

pub fn analyze_forecast(
    current: f64,
    series: &ForecastSeries,
) -> Result<ForecastInsight, PipelineError> {
    let values = series.values();
    let Some(final_value) = values.last().copied() else {
        return Err(PipelineError::InvalidHorizon {
            signal: series.signal().to_string(),
            horizon: 0,
            after: series.anchor_date(),
        });
    };
    if !current.is_finite() || current <= 0.0 {
        return Err(PipelineError::InvalidSeries {
            signal: series.signal().to_string(),
            reason: format!("reference price {current} must be positive"),
        });
    }

    let change_pct = (final_value - current) / current * 100.0;
    let trend = if change_pct > TREND_THRESHOLD_PCT {
        Trend::Bullish
    } else if change_pct < -TREND_THRESHOLD_PCT {
        Trend::Bearish
    } else {
        Trend::Neutral
    };

    let abs_change = change_pct.abs();
    let strength = if abs_change > STRONG_MOVE_PCT {
        Strength::Strong
    } else if abs_change > MODERATE_MOVE_PCT {
        Strength::Moderate
    } else {
        Strength::Weak
    };

    let step_volatility = step_return_std(&values);
    let volatility = if step_volatility > HIGH_VOLATILITY {
        Level::High
    } else if step_volatility > MEDIUM_VOLATILITY {
        Level::Medium
    } else {
        Level::Low
    };

    let risk = if volatility == Level::High || abs_change > HIGH_RISK_MOVE_PCT {
        Level::High
    } else if volatility == Level::Medium || abs_change > MEDIUM_RISK_MOVE_PCT {
        Level::Medium
    } else {
        Level::Low
    };

    Ok(ForecastInsight {
        signal: series.signal().to_string(),
        trend,
        strength,
        volatility,
        risk,
        change_pct,
        final_value,
        step_volatility,
    })
}

/// Steps starting from exactly zero have no defined return and are skipped.
fn step_return_std(values: &[f64]) -> f64 {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|pair| pair[0] != 0.0)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| {
            let d = *r - mean;
            d * d
        })
        .sum::<f64>()
        / returns.len() as f64;
    variance.sqrt()
}
