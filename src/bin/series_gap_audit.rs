use std::path::PathBuf;

use pricecast::{
    build_asset_table, init_logging, load_wide_csv, log_app_start, log_asset_selected,
    logging_config_from_env, pipeline_config_from_env, write_feature_table_csv, SignalBundle,
};

const USAGE: &str =
    "usage: series_gap_audit <wide.csv> <asset-key> [date-column] [features-out.csv]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let csv_path = PathBuf::from(args.next().ok_or(USAGE)?);
    let asset_key = args.next().ok_or(USAGE)?;
    let date_column = args.next().unwrap_or_else(|| "Date".to_string());
    let features_out = args.next().map(PathBuf::from);

    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("series_gap_audit", &logging);

    let config = pipeline_config_from_env()?;
    let asset = config
        .asset(&asset_key)
        .ok_or_else(|| format!("unknown asset '{asset_key}'"))?;
    log_asset_selected(
        "series_gap_audit",
        &asset.key,
        &csv_path.display().to_string(),
        Some(asset.lookback),
    );

    let series = load_wide_csv(&csv_path, &date_column)?;
    println!(
        "Auditing {} ({}) from {} with {} loaded signals",
        asset.display_name,
        asset.primary,
        csv_path.display(),
        series.len()
    );
    for item in &series {
        println!(
            "  loaded {:<12} points={} observed={} range={}",
            item.name(),
            item.len(),
            item.observed_count(),
            item.range()
                .map(|range| range.to_string())
                .unwrap_or_else(|| "empty".to_string())
        );
    }

    let inputs = SignalBundle::from_series(&asset.primary, series)?;
    let (table, report) = match build_asset_table(asset, &inputs) {
        Ok(built) => built,
        Err(err) => {
            println!("\nRESULT: alignment failed: {err}");
            return Err(err.into());
        }
    };

    println!(
        "\nAligned {} rows ({:?}) over {}; leading primary rows dropped={} inner-join dropped={}",
        report.output_rows,
        report.join_mode,
        report
            .range
            .as_ref()
            .map(|range| range.to_string())
            .unwrap_or_else(|| "empty".to_string()),
        report.leading_primary_dropped,
        report.inner_join_dropped
    );
    for signal in &report.signals {
        println!(
            "  {:<12} observed={} ffill={} bfill={} last_observed={}",
            signal.signal,
            signal.observed,
            signal.forward_filled,
            signal.backward_filled,
            signal
                .last_observed
                .map(|date| date.to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    if table.len() < asset.lookback {
        println!(
            "\nWARNING: {} rows is shorter than the {}-row lookback",
            table.len(),
            asset.lookback
        );
    }

    if let Some(path) = features_out {
        write_feature_table_csv(&path, &table)?;
        println!("\nWrote feature table to {}", path.display());
    }

    if report.total_filled() == 0 {
        println!("\nRESULT: no gaps filled; every signal observed on every primary date.");
    } else {
        println!(
            "\nRESULT: {} cells filled across {} signals.",
            report.total_filled(),
            report
                .signals
                .iter()
                .filter(|s| s.forward_filled + s.backward_filled > 0)
                .count()
        );
    }
    Ok(())
}
