//! Per-asset orchestration: align, build features, normalize, window, forecast.
//!
//! Each `AssetPipeline` owns its scaler and model. Nothing is shared between
//! assets, so a batch can hand whole pipelines to separate threads.

use std::panic;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::align::{align, AlignReport};
use crate::config::AssetConfig;
use crate::error::PipelineError;
use crate::features::{
    build_features, normalize, FeatureSchema, FeatureTable, MinMaxScaler, Scaler,
};
use crate::forecast::{
    forecast, max_range_steps, select_ranges, summarize_next_day, ForecastSeries,
    ForecastSummary, Predictor, RangeForecast,
};
use crate::insight::{analyze_forecast, ForecastInsight};
use crate::series::TimeSeries;
use crate::window::{
    make_latest_window, make_training_windows, make_validation_windows, TrainingSample,
};

/// Raw inputs for one asset: the primary price and every secondary signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBundle {
    pub primary: TimeSeries,
    pub secondary: Vec<TimeSeries>,
}

impl SignalBundle {
    pub fn new(primary: TimeSeries, secondary: Vec<TimeSeries>) -> Self {
        Self { primary, secondary }
    }

    /// Splits loaded series into the named primary and the rest.
    pub fn from_series(primary: &str, series: Vec<TimeSeries>) -> Result<Self, PipelineError> {
        let mut found = None;
        let mut secondary = Vec::with_capacity(series.len().saturating_sub(1));
        for item in series {
            if item.name() == primary && found.is_none() {
                found = Some(item);
            } else {
                secondary.push(item);
            }
        }

        let primary = found.ok_or_else(|| PipelineError::DataUnavailable {
            signal: primary.to_string(),
            range: None,
        })?;
        Ok(Self { primary, secondary })
    }
}

/// Output of training-set preparation, handed to the external trainer.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub schema: Arc<FeatureSchema>,
    pub scaler: MinMaxScaler,
    pub table: FeatureTable,
    pub train: Vec<TrainingSample>,
    pub validation: Vec<TrainingSample>,
    pub report: AlignReport,
}

/// Aligns `inputs` and lays them out per the asset's feature order.
///
/// Derived signals listed in the config are computed from the primary's date
/// axis unless the bundle already carries a series with that name.
pub fn build_asset_table(
    config: &AssetConfig,
    inputs: &SignalBundle,
) -> Result<(FeatureTable, AlignReport), PipelineError> {
    if inputs.primary.name() != config.primary {
        return Err(PipelineError::SchemaMismatch {
            signal: inputs.primary.name().to_string(),
            detail: format!(
                "asset '{}' expects primary signal '{}'",
                config.key, config.primary
            ),
            range: inputs.primary.range(),
        });
    }

    let mut secondary = inputs.secondary.clone();
    let primary_dates: Vec<_> = inputs.primary.dates().collect();
    for derived in &config.derived {
        if secondary.iter().any(|series| series.name() == derived.name()) {
            continue;
        }
        secondary.push(derived.build(&primary_dates)?);
    }

    let (aligned, report) = align(&inputs.primary, &secondary, config.join_mode)?;
    let table = build_features(&aligned, &config.feature_order)?;

    info!(
        component = "pipeline",
        event = "pipeline.table.built",
        asset = %config.key,
        rows = table.len(),
        filled_cells = report.total_filled(),
        range = ?table.range()
    );
    Ok((table, report))
}

/// Builds the training and validation windows plus the scaler fitted for them.
///
/// With `holdout_rows` set, the trailing rows are kept out of both scaler
/// fitting and the training windows and become the validation targets.
pub fn prepare_training_set(
    config: &AssetConfig,
    inputs: &SignalBundle,
    holdout_rows: Option<usize>,
) -> Result<TrainingSet, PipelineError> {
    let (table, report) = build_asset_table(config, inputs)?;

    let split_at = match holdout_rows {
        Some(0) | None => None,
        Some(holdout) => match table.len().checked_sub(holdout) {
            Some(split) if split > 0 => Some(split),
            _ => {
                return Err(PipelineError::InsufficientHistory {
                    signal: config.primary.clone(),
                    required: holdout + 1,
                    available: table.len(),
                    range: table.range(),
                })
            }
        },
    };

    let scaler = MinMaxScaler::fit_prefix(&table, split_at.unwrap_or(table.len()))?;
    let normalized = normalize(&table, &scaler)?;
    let train = make_training_windows(&normalized, config.lookback, split_at)?;
    let validation = match split_at {
        Some(split) => make_validation_windows(&normalized, config.lookback, split)?,
        None => Vec::new(),
    };

    info!(
        component = "pipeline",
        event = "pipeline.training_set.prepared",
        asset = %config.key,
        train_samples = train.len(),
        validation_samples = validation.len(),
        split_at = ?split_at,
        fingerprint = scaler.schema_fingerprint()
    );

    Ok(TrainingSet {
        schema: Arc::clone(table.schema()),
        scaler,
        table,
        train,
        validation,
        report,
    })
}

/// One asset's forecasting stack: config, trained model, fitted scaler.
#[derive(Debug, Clone)]
pub struct AssetPipeline<M, S = MinMaxScaler> {
    config: AssetConfig,
    model: M,
    scaler: S,
}

impl<M, S> AssetPipeline<M, S>
where
    M: Predictor,
    S: Scaler,
{
    /// Rejects a scaler fitted on a different feature layout than `config`.
    pub fn new(config: AssetConfig, model: M, scaler: S) -> Result<Self, PipelineError> {
        if config.lookback == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "asset '{}': lookback must be > 0",
                config.key
            )));
        }
        let schema = config.schema()?;
        if schema.fingerprint() != scaler.schema_fingerprint() {
            return Err(PipelineError::SchemaMismatch {
                signal: config.primary.clone(),
                detail: format!(
                    "asset '{}' feature schema {} does not match scaler schema {}",
                    config.key,
                    schema.fingerprint(),
                    scaler.schema_fingerprint()
                ),
                range: None,
            });
        }
        Ok(Self {
            config,
            model,
            scaler,
        })
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn scaler(&self) -> &S {
        &self.scaler
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn build_table(
        &self,
        inputs: &SignalBundle,
    ) -> Result<(FeatureTable, AlignReport), PipelineError> {
        build_asset_table(&self.config, inputs)
    }

    pub fn forecast(
        &self,
        inputs: &SignalBundle,
        horizon: usize,
    ) -> Result<ForecastSeries, PipelineError> {
        self.run(inputs, horizon).map(|(series, _)| series)
    }

    /// One recursive run long enough for the largest range.
    pub fn forecast_ranges(
        &self,
        inputs: &SignalBundle,
        ranges: &[(&str, usize)],
    ) -> Result<Vec<RangeForecast>, PipelineError> {
        let (series, _) = self.run(inputs, max_range_steps(ranges))?;
        select_ranges(&series, ranges)
    }

    pub fn predict_tomorrow(
        &self,
        inputs: &SignalBundle,
    ) -> Result<ForecastSummary, PipelineError> {
        let (series, last_close) = self.run(inputs, 1)?;
        summarize_next_day(last_close, &series)
    }

    pub fn forecast_with_insight(
        &self,
        inputs: &SignalBundle,
        horizon: usize,
    ) -> Result<(ForecastSeries, ForecastInsight), PipelineError> {
        let (series, last_close) = self.run(inputs, horizon)?;
        let insight = analyze_forecast(last_close, &series)?;
        Ok((series, insight))
    }

    fn run(
        &self,
        inputs: &SignalBundle,
        horizon: usize,
    ) -> Result<(ForecastSeries, f64), PipelineError> {
        let (table, _) = self.build_table(inputs)?;
        let last_close = table
            .primary_values()
            .last()
            .copied()
            .ok_or_else(|| PipelineError::DataUnavailable {
                signal: self.config.primary.clone(),
                range: inputs.primary.range(),
            })?;

        let normalized = normalize(&table, &self.scaler)?;
        let window = make_latest_window(&normalized, self.config.lookback)?;
        let series = forecast(
            &self.model,
            &self.scaler,
            &window,
            horizon,
            self.config.calendar,
        )?;
        Ok((series, last_close))
    }
}

pub struct BatchJob<M, S = MinMaxScaler> {
    pub pipeline: AssetPipeline<M, S>,
    pub inputs: SignalBundle,
    pub horizon: usize,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub asset: String,
    pub result: Result<ForecastSeries, PipelineError>,
}

/// Runs every job in order; a failed asset does not stop the rest.
pub fn forecast_batch<M, S>(jobs: Vec<BatchJob<M, S>>) -> Vec<BatchOutcome>
where
    M: Predictor,
    S: Scaler,
{
    let outcomes: Vec<BatchOutcome> = jobs.into_iter().map(run_job).collect();
    log_batch_finish(&outcomes, false);
    outcomes
}

/// Runs each job on its own scoped thread. Outcomes keep job order.
pub fn forecast_batch_parallel<M, S>(jobs: Vec<BatchJob<M, S>>) -> Vec<BatchOutcome>
where
    M: Predictor + Send,
    S: Scaler + Send,
{
    let outcomes: Vec<BatchOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| scope.spawn(move || run_job(job)))
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(payload) => panic::resume_unwind(payload),
            })
            .collect()
    });
    log_batch_finish(&outcomes, true);
    outcomes
}

fn run_job<M, S>(job: BatchJob<M, S>) -> BatchOutcome
where
    M: Predictor,
    S: Scaler,
{
    let asset = job.pipeline.config.key.clone();
    let result = job.pipeline.forecast(&job.inputs, job.horizon);
    if let Err(err) = &result {
        warn!(
            component = "pipeline",
            event = "pipeline.batch.asset_failed",
            asset = %asset,
            signal = ?err.signal(),
            error = %err
        );
    }
    BatchOutcome { asset, result }
}

fn log_batch_finish(outcomes: &[BatchOutcome], parallel: bool) {
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(
        component = "pipeline",
        event = "pipeline.batch.finish",
        parallel,
        asset_count = outcomes.len(),
        failed_count = failed
    );
}
