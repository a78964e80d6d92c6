//! Per-asset pipeline configuration.
//!
//! Defaults cover gold, bitcoin, and the equity basket. A JSON file named by
//! `PRICECAST_CONFIG` replaces the defaults; `PRICECAST_LOOKBACK` and
//! `PRICECAST_HOLDOUT_ROWS` override individual values.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::align::JoinMode;
use crate::derived::DerivedSignal;
use crate::error::PipelineError;
use crate::features::FeatureSchema;
use crate::forecast::ForecastCalendar;

pub const MACRO_SIGNALS: [&str; 3] = ["DXY", "VIX", "Yield_10Y"];
pub const SENTIMENT_SIGNAL: &str = "Sentiment";

const STOCK_TICKERS: [(&str, &str); 11] = [
    ("SPY", "S&P 500 ETF"),
    ("QQQ", "Nasdaq 100 ETF"),
    ("DIA", "Dow Jones ETF"),
    ("AAPL", "Apple Inc."),
    ("MSFT", "Microsoft Corp."),
    ("GOOGL", "Alphabet Inc."),
    ("AMZN", "Amazon.com Inc."),
    ("NVDA", "NVIDIA Corp."),
    ("META", "Meta Platforms"),
    ("TSLA", "Tesla Inc."),
    ("TSM", "Taiwan Semiconductor"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub key: String,
    pub display_name: String,
    pub primary: String,
    pub feature_order: Vec<String>,
    pub lookback: usize,
    #[serde(default)]
    pub join_mode: JoinMode,
    #[serde(default)]
    pub calendar: ForecastCalendar,
    #[serde(default)]
    pub derived: Vec<DerivedSignal>,
}

impl AssetConfig {
    pub fn schema(&self) -> Result<FeatureSchema, PipelineError> {
        FeatureSchema::new(&self.primary, &self.feature_order)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback == 0 {
            return Err(ConfigError::Invalid(format!(
                "asset '{}': lookback must be > 0",
                self.key
            )));
        }
        self.schema()
            .map_err(|err| ConfigError::Invalid(format!("asset '{}': {err}", self.key)))?;

        let mut seen = HashSet::new();
        for derived in &self.derived {
            if !seen.insert(*derived) {
                return Err(ConfigError::Invalid(format!(
                    "asset '{}': derived signal {} listed more than once",
                    self.key,
                    derived.name()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub assets: Vec<AssetConfig>,
    /// Trailing rows kept out of training windows and scaler fitting.
    #[serde(default)]
    pub holdout_rows: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut assets = vec![
            AssetConfig {
                key: "gold".to_string(),
                display_name: "Gold (XAUUSD)".to_string(),
                primary: "Gold".to_string(),
                feature_order: feature_order("Gold", &[]),
                lookback: 60,
                join_mode: JoinMode::LeftOnPrimary,
                calendar: ForecastCalendar::Weekdays,
                derived: Vec::new(),
            },
            AssetConfig {
                key: "btc".to_string(),
                display_name: "Bitcoin".to_string(),
                primary: "BTC".to_string(),
                feature_order: feature_order("BTC", &[DerivedSignal::HalvingCycle]),
                lookback: 90,
                join_mode: JoinMode::LeftOnPrimary,
                calendar: ForecastCalendar::Daily,
                derived: vec![DerivedSignal::HalvingCycle],
            },
        ];

        for (ticker, name) in STOCK_TICKERS {
            assets.push(AssetConfig {
                key: ticker.to_ascii_lowercase(),
                display_name: name.to_string(),
                primary: ticker.to_string(),
                feature_order: feature_order(ticker, &[]),
                lookback: 60,
                join_mode: JoinMode::LeftOnPrimary,
                calendar: ForecastCalendar::Weekdays,
                derived: Vec::new(),
            });
        }

        Self {
            assets,
            holdout_rows: None,
        }
    }
}

impl PipelineConfig {
    pub fn asset(&self, key: &str) -> Option<&AssetConfig> {
        self.assets
            .iter()
            .find(|asset| asset.key.eq_ignore_ascii_case(key))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for asset in &self.assets {
            if !keys.insert(asset.key.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "asset '{}' configured more than once",
                    asset.key
                )));
            }
            asset.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = match env::var("PRICECAST_CONFIG") {
        Ok(path) if !path.trim().is_empty() => {
            PipelineConfig::from_json_file(Path::new(path.trim()))?
        }
        _ => PipelineConfig::default(),
    };

    if let Ok(raw) = env::var("PRICECAST_LOOKBACK") {
        let lookback = parse_positive(&raw, "PRICECAST_LOOKBACK")?;
        for asset in &mut config.assets {
            asset.lookback = lookback;
        }
    }

    if let Ok(raw) = env::var("PRICECAST_HOLDOUT_ROWS") {
        config.holdout_rows = Some(parse_positive(&raw, "PRICECAST_HOLDOUT_ROWS")?);
    }

    config.validate()?;
    Ok(config)
}

fn feature_order(primary: &str, derived: &[DerivedSignal]) -> Vec<String> {
    let mut order = vec![primary.to_string()];
    order.extend(MACRO_SIGNALS.iter().map(|name| name.to_string()));
    order.push(SENTIMENT_SIGNAL.to_string());
    order.extend(derived.iter().map(|signal| signal.name().to_string()));
    order
}

fn parse_positive(raw: &str, var: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid(format!(
            "{var} must be a positive integer, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_match_asset_registry() {
        let cfg = PipelineConfig::default();
        cfg.validate().expect("defaults are valid");

        let gold = cfg.asset("GOLD").expect("gold configured");
        assert_eq!(
            gold.feature_order,
            vec!["Gold", "DXY", "VIX", "Yield_10Y", "Sentiment"]
        );
        assert_eq!(gold.lookback, 60);

        let btc = cfg.asset("btc").expect("btc configured");
        assert_eq!(btc.lookback, 90);
        assert_eq!(btc.calendar, ForecastCalendar::Daily);
        assert_eq!(btc.feature_order.last().map(String::as_str), Some("Halving_Cycle"));

        assert_eq!(cfg.assets.len(), 13);
        assert!(cfg
            .assets
            .iter()
            .all(|asset| asset.join_mode == JoinMode::LeftOnPrimary));
    }

    #[test]
    fn env_overrides_lookback_and_holdout() {
        let cfg = with_env_vars(
            &[
                ("PRICECAST_CONFIG", None),
                ("PRICECAST_LOOKBACK", Some("30")),
                ("PRICECAST_HOLDOUT_ROWS", Some("20")),
            ],
            pipeline_config_from_env,
        )
        .expect("env config should load");

        assert!(cfg.assets.iter().all(|asset| asset.lookback == 30));
        assert_eq!(cfg.holdout_rows, Some(20));
    }

    #[test]
    fn invalid_lookback_env_is_rejected() {
        let err = with_env_vars(
            &[
                ("PRICECAST_CONFIG", None),
                ("PRICECAST_LOOKBACK", Some("zero")),
                ("PRICECAST_HOLDOUT_ROWS", None),
            ],
            pipeline_config_from_env,
        )
        .expect_err("non-numeric lookback must fail");
        assert!(err.to_string().contains("PRICECAST_LOOKBACK"));
    }

    #[test]
    fn json_config_requires_primary_in_feature_order() {
        let raw = r#"{
            "assets": [{
                "key": "gold",
                "display_name": "Gold",
                "primary": "Gold",
                "feature_order": ["DXY", "VIX"],
                "lookback": 60
            }]
        }"#;
        let err = PipelineConfig::from_json_str(raw).expect_err("primary missing");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_config_fills_defaults() {
        let raw = r#"{
            "assets": [{
                "key": "eth",
                "display_name": "Ether",
                "primary": "ETH",
                "feature_order": ["ETH", "Sentiment"],
                "lookback": 45,
                "calendar": "daily"
            }],
            "holdout_rows": 30
        }"#;
        let cfg = PipelineConfig::from_json_str(raw).expect("valid config");
        let eth = cfg.asset("eth").unwrap();
        assert_eq!(eth.join_mode, JoinMode::LeftOnPrimary);
        assert_eq!(eth.calendar, ForecastCalendar::Daily);
        assert!(eth.derived.is_empty());
        assert_eq!(cfg.holdout_rows, Some(30));
    }
}
