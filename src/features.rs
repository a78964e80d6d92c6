//! Shared aligned-table-to-features transform and the scaler contract.
//!
//! Training and inference build the feature table through the same
//! `build_features` call, and the schema fingerprint ties a fitted scaler to
//! the exact column layout it was fitted on.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::align::AlignedTable;
use crate::error::PipelineError;
use crate::series::DateRange;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    primary: String,
    primary_index: usize,
    columns: Vec<String>,
    fingerprint: String,
}

impl FeatureSchema {
    pub fn new(primary: &str, feature_order: &[String]) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for name in feature_order {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::SchemaMismatch {
                    signal: name.clone(),
                    detail: "feature listed more than once".to_string(),
                    range: None,
                });
            }
        }

        let primary_index = feature_order
            .iter()
            .position(|name| name == primary)
            .ok_or_else(|| PipelineError::SchemaMismatch {
                signal: primary.to_string(),
                detail: "primary signal missing from feature order".to_string(),
                range: None,
            })?;

        let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, primary, feature_order);
        Ok(Self {
            version: FEATURE_SCHEMA_VERSION,
            primary: primary.to_string(),
            primary_index,
            columns: feature_order.to_vec(),
            fingerprint,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn primary_index(&self) -> usize {
        self.primary_index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Native-unit feature rows laid out per a `FeatureSchema`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    schema: Arc<FeatureSchema>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

/// Scaled feature rows; the only table windows are cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    schema: Arc<FeatureSchema>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

macro_rules! table_accessors {
    ($ty:ident, $new_vis:vis) => {
        impl $ty {
            $new_vis fn new(
                schema: Arc<FeatureSchema>,
                dates: Vec<NaiveDate>,
                rows: Vec<Vec<f64>>,
            ) -> Result<Self, PipelineError> {
                validate_table(&schema, &dates, &rows)?;
                Ok(Self {
                    schema,
                    dates,
                    rows,
                })
            }

            pub fn schema(&self) -> &Arc<FeatureSchema> {
                &self.schema
            }

            pub fn dates(&self) -> &[NaiveDate] {
                &self.dates
            }

            pub fn rows(&self) -> &[Vec<f64>] {
                &self.rows
            }

            pub fn len(&self) -> usize {
                self.rows.len()
            }

            pub fn is_empty(&self) -> bool {
                self.rows.is_empty()
            }

            pub fn range(&self) -> Option<DateRange> {
                DateRange::of(&self.dates)
            }

            pub fn column(&self, name: &str) -> Option<Vec<f64>> {
                let idx = self.schema.columns().iter().position(|c| c == name)?;
                Some(self.rows.iter().map(|row| row[idx]).collect())
            }

            pub fn primary_values(&self) -> Vec<f64> {
                let idx = self.schema.primary_index();
                self.rows.iter().map(|row| row[idx]).collect()
            }
        }
    };
}

table_accessors!(FeatureTable, pub);
// Normalized rows only come out of a `Scaler`.
table_accessors!(NormalizedTable, pub(crate));

/// Fitted normalization transform supplied by the model/storage side.
///
/// Implementations are fitted once and never refitted; every method takes
/// `&self`.
pub trait Scaler {
    /// Fingerprint of the feature schema this scaler was fitted on.
    fn schema_fingerprint(&self) -> &str;

    fn normalize(&self, table: &FeatureTable) -> Result<NormalizedTable, PipelineError>;

    fn denormalize(&self, table: &NormalizedTable) -> Result<FeatureTable, PipelineError>;

    /// Maps normalized primary-column values back to native units.
    fn denormalize_primary(&self, values: &[f64]) -> Vec<f64>;
}

/// Per-column min-max scaling into [0, 1].
///
/// Persisted state is re-validated on load: one finite min and one finite,
/// positive scale per schema column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MinMaxScalerState")]
pub struct MinMaxScaler {
    schema: FeatureSchema,
    mins: Vec<f64>,
    scales: Vec<f64>,
}

#[derive(Deserialize)]
struct MinMaxScalerState {
    schema: FeatureSchema,
    mins: Vec<f64>,
    scales: Vec<f64>,
}

impl TryFrom<MinMaxScalerState> for MinMaxScaler {
    type Error = PipelineError;

    fn try_from(state: MinMaxScalerState) -> Result<Self, Self::Error> {
        check_scaler_state(&state.schema, &state.mins, &state.scales)?;
        Ok(Self {
            schema: state.schema,
            mins: state.mins,
            scales: state.scales,
        })
    }
}

fn check_scaler_state(
    schema: &FeatureSchema,
    mins: &[f64],
    scales: &[f64],
) -> Result<(), PipelineError> {
    let mismatch = |detail: String| PipelineError::SchemaMismatch {
        signal: schema.primary().to_string(),
        detail,
        range: None,
    };

    let expected = schema_fingerprint(schema.version(), schema.primary(), schema.columns());
    if expected != schema.fingerprint() {
        return Err(mismatch(format!(
            "stored fingerprint {} does not match columns (expected {expected})",
            schema.fingerprint()
        )));
    }
    let primary_column = schema.columns().get(schema.primary_index());
    if primary_column.map(String::as_str) != Some(schema.primary()) {
        return Err(mismatch(format!(
            "primary index {} does not point at the primary column",
            schema.primary_index()
        )));
    }
    if mins.len() != schema.width() || scales.len() != schema.width() {
        return Err(mismatch(format!(
            "scaler has {} mins and {} scales for {} columns",
            mins.len(),
            scales.len(),
            schema.width()
        )));
    }
    if let Some(col) = mins.iter().position(|min| !min.is_finite()) {
        return Err(mismatch(format!(
            "non-finite min {} for column '{}'",
            mins[col],
            schema.columns()[col]
        )));
    }
    if let Some(col) = scales
        .iter()
        .position(|scale| !scale.is_finite() || *scale <= 0.0)
    {
        return Err(mismatch(format!(
            "scale {} for column '{}' must be finite and positive",
            scales[col],
            schema.columns()[col]
        )));
    }
    Ok(())
}

impl MinMaxScaler {
    pub fn fit(table: &FeatureTable) -> Result<Self, PipelineError> {
        Self::fit_prefix(table, table.len())
    }

    /// Fits on the first `rows` rows only, leaving a holdout tail unseen.
    pub fn fit_prefix(table: &FeatureTable, rows: usize) -> Result<Self, PipelineError> {
        let schema = table.schema();
        if rows == 0 || rows > table.len() {
            return Err(PipelineError::InsufficientHistory {
                signal: schema.primary().to_string(),
                required: rows.max(1),
                available: table.len(),
                range: table.range(),
            });
        }

        let width = schema.width();
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];
        for row in &table.rows()[..rows] {
            for (col, value) in row.iter().enumerate() {
                mins[col] = mins[col].min(*value);
                maxs[col] = maxs[col].max(*value);
            }
        }

        let scales = mins
            .iter()
            .zip(&maxs)
            .map(|(min, max)| {
                let span = max - min;
                if span > 0.0 {
                    span
                } else {
                    1.0
                }
            })
            .collect();

        info!(
            component = "features",
            event = "features.scaler.fitted",
            primary = schema.primary(),
            fitted_rows = rows,
            fingerprint = schema.fingerprint()
        );

        Ok(Self {
            schema: FeatureSchema::clone(schema),
            mins,
            scales,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    fn check_schema(
        &self,
        schema: &FeatureSchema,
        range: Option<DateRange>,
    ) -> Result<(), PipelineError> {
        if schema.fingerprint() != self.schema.fingerprint() {
            return Err(PipelineError::SchemaMismatch {
                signal: schema.primary().to_string(),
                detail: format!(
                    "scaler fitted on schema {} but table uses {}",
                    self.schema.fingerprint(),
                    schema.fingerprint()
                ),
                range,
            });
        }
        Ok(())
    }
}

impl Scaler for MinMaxScaler {
    fn schema_fingerprint(&self) -> &str {
        self.schema.fingerprint()
    }

    fn normalize(&self, table: &FeatureTable) -> Result<NormalizedTable, PipelineError> {
        self.check_schema(table.schema(), table.range())?;
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, value)| (value - self.mins[col]) / self.scales[col])
                    .collect()
            })
            .collect();
        NormalizedTable::new(Arc::clone(table.schema()), table.dates().to_vec(), rows)
    }

    fn denormalize(&self, table: &NormalizedTable) -> Result<FeatureTable, PipelineError> {
        self.check_schema(table.schema(), table.range())?;
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, value)| value * self.scales[col] + self.mins[col])
                    .collect()
            })
            .collect();
        FeatureTable::new(Arc::clone(table.schema()), table.dates().to_vec(), rows)
    }

    fn denormalize_primary(&self, values: &[f64]) -> Vec<f64> {
        let idx = self.schema.primary_index();
        values
            .iter()
            .map(|value| value * self.scales[idx] + self.mins[idx])
            .collect()
    }
}

pub fn build_features(
    table: &AlignedTable,
    feature_order: &[String],
) -> Result<FeatureTable, PipelineError> {
    let schema = FeatureSchema::new(table.primary(), feature_order).map_err(|err| match err {
        PipelineError::SchemaMismatch { signal, detail, .. } => PipelineError::SchemaMismatch {
            signal,
            detail,
            range: table.range(),
        },
        other => other,
    })?;

    let mut indices = Vec::with_capacity(feature_order.len());
    for name in feature_order {
        let idx = table
            .column_index(name)
            .ok_or_else(|| PipelineError::SchemaMismatch {
                signal: name.clone(),
                detail: "requested feature column absent from aligned table".to_string(),
                range: table.range(),
            })?;
        indices.push(idx);
    }

    let rows = table
        .rows()
        .iter()
        .map(|row| indices.iter().map(|idx| row[*idx]).collect())
        .collect();

    info!(
        component = "features",
        event = "features.built",
        primary = schema.primary(),
        column_count = schema.width(),
        row_count = table.len(),
        fingerprint = schema.fingerprint()
    );

    FeatureTable::new(Arc::new(schema), table.dates().to_vec(), rows)
}

/// Applies a fitted scaler; the scaler itself is never refitted here.
pub fn normalize<S: Scaler + ?Sized>(
    table: &FeatureTable,
    scaler: &S,
) -> Result<NormalizedTable, PipelineError> {
    let normalized = scaler.normalize(table)?;
    debug!(
        component = "features",
        event = "features.normalized",
        primary = table.schema().primary(),
        row_count = normalized.len()
    );
    Ok(normalized)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), PipelineError> {
    if expected_version != actual.version() {
        return Err(PipelineError::SchemaMismatch {
            signal: actual.primary().to_string(),
            detail: format!(
                "schema version mismatch: expected {expected_version}, got {}",
                actual.version()
            ),
            range: None,
        });
    }

    if expected_fingerprint != actual.fingerprint() {
        return Err(PipelineError::SchemaMismatch {
            signal: actual.primary().to_string(),
            detail: format!(
                "schema fingerprint mismatch: expected {expected_fingerprint}, got {}",
                actual.fingerprint()
            ),
            range: None,
        });
    }

    Ok(())
}

fn validate_table(
    schema: &FeatureSchema,
    dates: &[NaiveDate],
    rows: &[Vec<f64>],
) -> Result<(), PipelineError> {
    let mismatch = |detail: String| PipelineError::SchemaMismatch {
        signal: schema.primary().to_string(),
        detail,
        range: DateRange::of(dates),
    };

    if dates.len() != rows.len() {
        return Err(mismatch(format!(
            "{} dates for {} rows",
            dates.len(),
            rows.len()
        )));
    }
    if dates.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(mismatch("dates must be strictly increasing".to_string()));
    }

    for (date, row) in dates.iter().zip(rows) {
        if row.len() != schema.width() {
            return Err(mismatch(format!(
                "row at {date} has {} values, schema has {} columns",
                row.len(),
                schema.width()
            )));
        }
        if let Some(col) = row.iter().position(|value| !value.is_finite()) {
            return Err(PipelineError::DataUnavailable {
                signal: schema.columns()[col].clone(),
                range: Some(DateRange {
                    first: *date,
                    last: *date,
                }),
            });
        }
    }

    Ok(())
}

fn schema_fingerprint(version: u32, primary: &str, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update(format!("primary:{primary};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
