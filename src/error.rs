//! Failure taxonomy shared by every pipeline stage.

use chrono::NaiveDate;
use thiserror::Error;

use crate::series::{describe_range, DateRange};

/// Error returned by a model collaborator for a single prediction step.
pub type ModelError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid series '{signal}': {reason}")]
    InvalidSeries { signal: String, reason: String },
    #[error("no usable data for signal '{signal}' over {}", describe_range(.range))]
    DataUnavailable {
        signal: String,
        range: Option<DateRange>,
    },
    #[error("schema mismatch on '{signal}' over {}: {detail}", describe_range(.range))]
    SchemaMismatch {
        signal: String,
        detail: String,
        range: Option<DateRange>,
    },
    #[error(
        "insufficient history for '{signal}' over {}: need {required} rows, have {available}",
        describe_range(.range)
    )]
    InsufficientHistory {
        signal: String,
        required: usize,
        available: usize,
        range: Option<DateRange>,
    },
    #[error("invalid horizon {horizon} for '{signal}' after {after}: horizon must be >= 1")]
    InvalidHorizon {
        signal: String,
        horizon: usize,
        after: NaiveDate,
    },
    #[error("model inference failed for '{signal}' at step {step} ({date}): {source}")]
    ModelInferenceError {
        signal: String,
        step: usize,
        date: NaiveDate,
        #[source]
        source: ModelError,
    },
    #[error("non-finite forecast value {value} for '{signal}' at step {step} ({date})")]
    NonFiniteForecast {
        signal: String,
        step: usize,
        date: NaiveDate,
        value: f64,
    },
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Signal the failure is attributed to, when there is one.
    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::InvalidSeries { signal, .. }
            | Self::DataUnavailable { signal, .. }
            | Self::SchemaMismatch { signal, .. }
            | Self::InsufficientHistory { signal, .. }
            | Self::InvalidHorizon { signal, .. }
            | Self::ModelInferenceError { signal, .. }
            | Self::NonFiniteForecast { signal, .. } => Some(signal),
            Self::InvalidConfig(_) => None,
        }
    }
}
