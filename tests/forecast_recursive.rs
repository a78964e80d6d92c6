use std::cell::RefCell;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use pricecast::{
    build_asset_table, forecast, forecast_batch, forecast_batch_parallel, make_latest_window,
    normalize, AssetConfig, AssetPipeline, BatchJob, Direction, FeatureTable, ForecastCalendar,
    JoinMode, Level, MinMaxScaler, ModelError, NormalizedTable, PipelineError, Scaler,
    SignalBundle, TimeSeries, Trend, Window, FORECAST_RANGES,
};

const DAYS: u64 = 65;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid start date")
}

fn gold_config(calendar: ForecastCalendar) -> AssetConfig {
    AssetConfig {
        key: "gold".to_string(),
        display_name: "Gold".to_string(),
        primary: "Gold".to_string(),
        feature_order: vec!["Gold".to_string(), "DXY".to_string()],
        lookback: 60,
        join_mode: JoinMode::LeftOnPrimary,
        calendar,
        derived: Vec::new(),
    }
}

/// 65 daily closes; DXY is missing on the final date.
fn gold_inputs() -> SignalBundle {
    let gold = (0..DAYS)
        .map(|i| (start() + Days::new(i), 1800.0 + i as f64 * 2.0))
        .collect();
    let dxy = (0..DAYS)
        .map(|i| {
            let value = if i == DAYS - 1 {
                f64::NAN
            } else {
                104.0 - i as f64 * 0.05
            };
            (start() + Days::new(i), value)
        })
        .collect();
    SignalBundle::new(
        TimeSeries::new("Gold", gold).unwrap(),
        vec![TimeSeries::new("DXY", dxy).unwrap()],
    )
}

fn fitted_scaler(config: &AssetConfig, inputs: &SignalBundle) -> MinMaxScaler {
    let (table, _) = build_asset_table(config, inputs).unwrap();
    MinMaxScaler::fit(&table).unwrap()
}

/// Nudges the primary up by a fixed normalized step.
fn drift(window: &Window) -> Result<f64, ModelError> {
    let primary = window.schema().primary_index();
    Ok(window.last_row()[primary] + 0.01)
}

fn pipeline(calendar: ForecastCalendar) -> AssetPipeline<fn(&Window) -> Result<f64, ModelError>> {
    let config = gold_config(calendar);
    let scaler = fitted_scaler(&config, &gold_inputs());
    AssetPipeline::new(config, drift as fn(&Window) -> Result<f64, ModelError>, scaler).unwrap()
}

#[test]
fn sixty_five_day_scenario_yields_five_native_points() {
    let series = pipeline(ForecastCalendar::Daily)
        .forecast(&gold_inputs(), 5)
        .expect("forecast succeeds");

    assert_eq!(series.len(), 5);
    assert_eq!(series.signal(), "Gold");
    assert_eq!(series.anchor_date(), start() + Days::new(DAYS - 1));

    let last_close = 1800.0 + (DAYS - 1) as f64 * 2.0;
    for (idx, point) in series.points().iter().enumerate() {
        assert_eq!(point.horizon_index, idx + 1);
        assert_eq!(point.date, series.anchor_date() + Days::new(idx as u64 + 1));
        assert!(point.value.is_finite());
        // native units: close to the last real close, not in [0, 1]
        assert!(point.value > last_close && point.value < last_close + 20.0);
    }
    let values = series.values();
    assert!(values.windows(2).all(|pair| pair[1] > pair[0]));
}

#[test]
fn model_failure_on_third_step_aborts_without_partial_output() {
    let config = gold_config(ForecastCalendar::Daily);
    let inputs = gold_inputs();
    let scaler = fitted_scaler(&config, &inputs);
    let anchor = start() + Days::new(DAYS - 1);

    let failing = move |window: &Window| -> Result<f64, ModelError> {
        if window.end_date() >= anchor + Days::new(2) {
            return Err("session closed".into());
        }
        drift(window)
    };
    let pipeline = AssetPipeline::new(config, failing, scaler).unwrap();

    match pipeline.forecast(&inputs, 5).unwrap_err() {
        PipelineError::ModelInferenceError {
            signal, step, date, ..
        } => {
            assert_eq!(signal, "Gold");
            assert_eq!(step, 3);
            assert_eq!(date, anchor + Days::new(3));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn non_finite_model_output_is_an_inference_error() {
    let config = gold_config(ForecastCalendar::Daily);
    let inputs = gold_inputs();
    let scaler = fitted_scaler(&config, &inputs);
    let nan_model = |_: &Window| -> Result<f64, ModelError> { Ok(f64::NAN) };
    let pipeline = AssetPipeline::new(config, nan_model, scaler).unwrap();

    let err = pipeline.forecast(&inputs, 2).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ModelInferenceError { step: 1, .. }
    ));
}

#[test]
fn secondaries_carry_forward_while_primary_takes_each_prediction() {
    let config = gold_config(ForecastCalendar::Daily);
    let inputs = gold_inputs();
    let scaler = fitted_scaler(&config, &inputs);
    let (table, _) = build_asset_table(&config, &inputs).unwrap();
    let normalized = normalize(&table, &scaler).unwrap();
    let anchor = make_latest_window(&normalized, config.lookback).unwrap();

    let seen: RefCell<Vec<Vec<f64>>> = RefCell::new(Vec::new());
    let recording = |window: &Window| -> Result<f64, ModelError> {
        assert_eq!(window.len(), 60);
        seen.borrow_mut().push(window.last_row().to_vec());
        drift(window)
    };
    let pipeline = AssetPipeline::new(config, recording, scaler).unwrap();
    pipeline.forecast(&inputs, 5).unwrap();

    let rows = seen.borrow().clone();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], anchor.last_row());
    for pair in rows.windows(2) {
        // DXY is column 1 and never moves after the anchor
        assert_eq!(pair[1][1], anchor.last_row()[1]);
        assert_eq!(pair[1][0], pair[0][0] + 0.01);
    }
}

/// Delegates to a fitted scaler but drops all but the first two native values.
struct TruncatingScaler(MinMaxScaler);

impl Scaler for TruncatingScaler {
    fn schema_fingerprint(&self) -> &str {
        self.0.schema_fingerprint()
    }

    fn normalize(&self, table: &FeatureTable) -> Result<NormalizedTable, PipelineError> {
        self.0.normalize(table)
    }

    fn denormalize(&self, table: &NormalizedTable) -> Result<FeatureTable, PipelineError> {
        self.0.denormalize(table)
    }

    fn denormalize_primary(&self, values: &[f64]) -> Vec<f64> {
        let mut native = self.0.denormalize_primary(values);
        native.truncate(2);
        native
    }
}

#[test]
fn short_denormalized_output_is_not_returned_as_a_forecast() {
    let config = gold_config(ForecastCalendar::Daily);
    let inputs = gold_inputs();
    let scaler = TruncatingScaler(fitted_scaler(&config, &inputs));
    let (table, _) = build_asset_table(&config, &inputs).unwrap();
    let normalized = normalize(&table, &scaler).unwrap();
    let window = make_latest_window(&normalized, config.lookback).unwrap();

    let err = forecast(&drift, &scaler, &window, 5, ForecastCalendar::Daily).unwrap_err();
    match err {
        PipelineError::SchemaMismatch { signal, detail, .. } => {
            assert_eq!(signal, "Gold");
            assert!(detail.contains("returned 2 values for a 5-step forecast"), "{detail}");
            assert!(detail.contains(&window.end_date().to_string()), "{detail}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn zero_horizon_is_rejected() {
    let err = pipeline(ForecastCalendar::Daily)
        .forecast(&gold_inputs(), 0)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidHorizon { horizon: 0, .. }));
}

#[test]
fn weekday_calendar_skips_weekends() {
    let series = pipeline(ForecastCalendar::Weekdays)
        .forecast(&gold_inputs(), 10)
        .unwrap();

    assert!(series
        .points()
        .iter()
        .all(|point| !matches!(point.date.weekday(), Weekday::Sat | Weekday::Sun)));
    assert!(series
        .points()
        .windows(2)
        .all(|pair| pair[1].date > pair[0].date));
}

#[test]
fn range_forecast_picks_named_steps_from_one_run() {
    let pipeline = pipeline(ForecastCalendar::Weekdays);
    let inputs = gold_inputs();
    let ranges = &FORECAST_RANGES[..3];

    let picked = pipeline.forecast_ranges(&inputs, ranges).unwrap();
    let full = pipeline.forecast(&inputs, 10).unwrap();

    assert_eq!(picked.len(), 3);
    assert_eq!(picked[0].label, "1 Day");
    assert_eq!(picked[1].label, "1 Week");
    assert_eq!(picked[1].point, *full.point(5).unwrap());
    assert_eq!(picked[2].point, *full.point(10).unwrap());
}

#[test]
fn tomorrow_summary_and_insight_use_native_close() {
    let pipeline = pipeline(ForecastCalendar::Daily);
    let inputs = gold_inputs();
    let last_close = 1800.0 + (DAYS - 1) as f64 * 2.0;

    let summary = pipeline.predict_tomorrow(&inputs).unwrap();
    assert_eq!(summary.current, last_close);
    assert_eq!(summary.direction, Direction::Up);
    assert!((summary.change - (summary.predicted - last_close)).abs() < 1e-9);

    let (series, insight) = pipeline.forecast_with_insight(&inputs, 5).unwrap();
    assert_eq!(insight.final_value, series.values()[4]);
    assert_eq!(insight.trend, Trend::Neutral);
    assert_eq!(insight.volatility, Level::Low);
}

#[test]
fn scaler_fitted_on_other_layout_is_rejected() {
    let mut other = gold_config(ForecastCalendar::Daily);
    other.feature_order = vec!["DXY".to_string(), "Gold".to_string()];
    let scaler = fitted_scaler(&other, &gold_inputs());

    let err = AssetPipeline::new(gold_config(ForecastCalendar::Daily), drift, scaler)
        .err()
        .expect("scaler layout differs from config");
    assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
}

fn batch_jobs() -> Vec<BatchJob<fn(&Window) -> Result<f64, ModelError>>> {
    let broken_dxy = TimeSeries::new(
        "DXY",
        (0..DAYS)
            .map(|i| (start() + Days::new(i), f64::NAN))
            .collect(),
    )
    .unwrap();
    let broken = SignalBundle::new(gold_inputs().primary, vec![broken_dxy]);

    vec![
        BatchJob {
            pipeline: pipeline(ForecastCalendar::Daily),
            inputs: broken,
            horizon: 3,
        },
        BatchJob {
            pipeline: pipeline(ForecastCalendar::Daily),
            inputs: gold_inputs(),
            horizon: 3,
        },
    ]
}

#[test]
fn batch_reports_each_asset_independently() {
    for outcomes in [
        forecast_batch(batch_jobs()),
        forecast_batch_parallel(batch_jobs()),
    ] {
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0].result {
            Err(PipelineError::DataUnavailable { signal, .. }) => assert_eq!(signal, "DXY"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let ok = outcomes[1].result.as_ref().expect("healthy asset forecasts");
        assert_eq!(ok.len(), 3);
        assert_eq!(outcomes[1].asset, "gold");
    }
}
