use std::fs;

use chrono::NaiveDate;
use pricecast::{
    align, build_features, daily_mean_scores, load_series_csv, load_series_sqlite, load_wide_csv,
    store_series_sqlite, write_feature_table_csv, JoinMode, SourceError, TimeSeries,
};
use rusqlite::{params, Connection};
use tempfile::{tempdir, NamedTempFile};

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid test date")
}

const INSIGHTS_CSV: &str = "\
Date,Gold,DXY,VIX,Yield_10Y,Sentiment
2024-05-01 00:00:00,2300.5,105.1,13.2,4.6,0.12
2024-05-02 00:00:00,2310.0,,13.9,4.58,
2024-05-03 00:00:00,2301.25,104.7,NaN,4.5,0.3
";

#[test]
fn wide_csv_loads_every_column_in_file_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gold_global_insights.csv");
    fs::write(&path, INSIGHTS_CSV).unwrap();

    let series = load_wide_csv(&path, "Date").expect("csv loads");
    let names: Vec<&str> = series.iter().map(TimeSeries::name).collect();
    assert_eq!(names, ["Gold", "DXY", "VIX", "Yield_10Y", "Sentiment"]);

    let dxy = &series[1];
    assert_eq!(dxy.len(), 3);
    assert_eq!(dxy.observed_count(), 2);
    assert_eq!(dxy.value_on(date("2024-05-02")), None);
    assert_eq!(dxy.value_on(date("2024-05-03")), Some(104.7));
    assert!(series[2].points()[2].1.is_nan());
}

#[test]
fn single_column_csv_is_renamed_to_signal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vix.csv");
    fs::write(&path, "day,close\n2024-01-02,12.5\n2024-01-03,13.0\n").unwrap();

    let vix = load_series_csv(&path, "day", "close", "VIX").unwrap();
    assert_eq!(vix.name(), "VIX");
    assert_eq!(vix.points()[1], (date("2024-01-03"), 13.0));
}

#[test]
fn csv_errors_name_the_column_or_cell() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    fs::write(&path, "Date,Gold\n2024-01-02,12.5\n2024-01-03,n/a\n").unwrap();

    let missing = load_series_csv(&path, "Date", "Silver", "Silver").unwrap_err();
    assert!(matches!(missing, SourceError::MissingColumn { ref column, .. } if column == "Silver"));

    let bad_cell = load_series_csv(&path, "Date", "Gold", "Gold").unwrap_err();
    match bad_cell {
        SourceError::ParseField {
            field,
            value,
            record,
        } => {
            assert_eq!(field, "Gold");
            assert_eq!(value, "n/a");
            assert_eq!(record, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unsorted_csv_rows_are_an_invalid_series() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unsorted.csv");
    fs::write(&path, "Date,Gold\n2024-01-03,1\n2024-01-02,2\n").unwrap();

    let err = load_series_csv(&path, "Date", "Gold", "Gold").unwrap_err();
    assert!(matches!(err, SourceError::Series(_)));
}

#[test]
fn sqlite_store_round_trips_missing_markers_and_filters_range() {
    let store = NamedTempFile::new().unwrap();
    let series = TimeSeries::new(
        "Sentiment",
        vec![
            (date("2024-03-01"), 0.1),
            (date("2024-03-02"), f64::NAN),
            (date("2024-03-03"), 0.3),
            (date("2024-03-04"), 0.4),
        ],
    )
    .unwrap();
    store_series_sqlite(store.path(), &series).unwrap();

    let conn = Connection::open(store.path()).unwrap();
    let nulls: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM daily_series WHERE signal = ?1 AND value IS NULL",
            params!["Sentiment"],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(nulls, 1);

    let all = load_series_sqlite(store.path(), "Sentiment", None, None).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all.observed_count(), 3);

    let slice = load_series_sqlite(
        store.path(),
        "Sentiment",
        Some(date("2024-03-02")),
        Some(date("2024-03-03")),
    )
    .unwrap();
    assert_eq!(slice.len(), 2);
    assert!(slice.points()[0].1.is_nan());
    assert_eq!(slice.points()[1], (date("2024-03-03"), 0.3));

    let other = load_series_sqlite(store.path(), "DXY", None, None).unwrap();
    assert!(other.is_empty());
}

#[test]
fn feature_table_csv_reloads_as_the_same_columns() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("insights.csv");
    fs::write(&src, INSIGHTS_CSV).unwrap();

    let mut series = load_wide_csv(&src, "Date").unwrap();
    let gold = series.remove(0);
    let (aligned, _) = align(&gold, &series, JoinMode::LeftOnPrimary).unwrap();
    let order: Vec<String> = ["Gold", "Sentiment", "DXY"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let table = build_features(&aligned, &order).unwrap();

    let out = dir.path().join("features.csv");
    write_feature_table_csv(&out, &table).unwrap();
    let reloaded = load_wide_csv(&out, "Date").unwrap();

    let names: Vec<&str> = reloaded.iter().map(TimeSeries::name).collect();
    assert_eq!(names, ["Gold", "Sentiment", "DXY"]);
    assert!(reloaded.iter().all(|s| s.observed_count() == s.len()));
    assert_eq!(
        reloaded[1].value_on(date("2024-05-02")),
        Some(0.12),
        "sentiment gap forward-filled before export"
    );
}

#[test]
fn article_scores_collapse_to_daily_means() {
    let scored = [
        (date("2024-04-01"), 0.5),
        (date("2024-04-02"), -0.2),
        (date("2024-04-01"), 0.1),
        (date("2024-04-02"), f64::NAN),
        (date("2024-04-03"), f64::NAN),
    ];
    let daily = daily_mean_scores("Sentiment", &scored).unwrap();

    assert_eq!(daily.len(), 2);
    assert!((daily.points()[0].1 - 0.3).abs() < 1e-12);
    assert_eq!(daily.points()[1], (date("2024-04-02"), -0.2));
}
