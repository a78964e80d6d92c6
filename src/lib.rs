//! Pricecast core crate.
//!
//! Daily multi-signal price forecasting:
//! - alignment of primary price, macro, and sentiment series onto one date axis
//! - schema-fingerprinted feature tables and min-max scaling
//! - lookback windowing and recursive multi-step forecasting
//! - CSV/SQLite series sources and per-asset configuration

mod align;
mod config;
mod derived;
mod error;
mod features;
mod forecast;
mod insight;
mod observability;
mod pipeline;
mod series;
mod source;
mod window;

pub use align::{align, AlignReport, AlignedTable, JoinMode, SignalFillReport};
pub use config::{
    pipeline_config_from_env, AssetConfig, ConfigError, PipelineConfig, MACRO_SIGNALS,
    SENTIMENT_SIGNAL,
};
pub use derived::{
    days_to_nearest_halving, halving_cycle_series, DerivedSignal, HALVING_CYCLE_SIGNAL,
};
pub use error::{ModelError, PipelineError};
pub use features::{
    assert_schema_compatible, build_features, normalize, FeatureSchema, FeatureTable,
    MinMaxScaler, NormalizedTable, Scaler, FEATURE_SCHEMA_VERSION,
};
pub use forecast::{
    forecast, max_range_steps, select_ranges, summarize_next_day, Direction, ForecastCalendar,
    ForecastPoint, ForecastSeries, ForecastSummary, Predictor, RangeForecast, FORECAST_RANGES,
};
pub use insight::{analyze_forecast, ForecastInsight, Level, Strength, Trend};
pub use observability::{
    init_logging, log_app_start, log_asset_selected, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    build_asset_table, forecast_batch, forecast_batch_parallel, prepare_training_set,
    AssetPipeline, BatchJob, BatchOutcome, SignalBundle, TrainingSet,
};
pub use series::{daily_mean_scores, DateRange, TimeSeries};
pub use source::{
    load_series_csv, load_series_sqlite, load_wide_csv, store_series_sqlite,
    write_feature_table_csv, SourceError, DAILY_SERIES_SCHEMA_SQL,
};
pub use window::{
    make_latest_window, make_training_windows, make_validation_windows, TrainingSample, Window,
};
