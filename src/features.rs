//! Aligned-table to feature-table transform shared by training and prediction.

use std::collections::{HashSet, VecDeque};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::align::AlignedTable;
use crate::error::DatasetError;
use crate::series::{DatasetMode, MetricSet};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const TIME_COLUMN: &str = "time";
pub const TARGET_PREFIX: &str = "target_";

const CALENDAR_COLUMNS: [&str; 3] = ["hour", "day_of_week", "month"];
const ROLLING_STATS: [&str; 4] = ["mean", "sum", "max", "min"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Source,
    Label,
    Calendar,
    Rolling,
    Lag,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn has_kind(&self, kind: ColumnKind) -> bool {
        self.columns.iter().any(|column| column.kind == kind)
    }
}

/// One output row; `values` follows the schema column order (the time column
/// is carried separately in `timestamp`).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.schema.column_index(name)?;
        Some(self.rows.iter().map(|row| row.values[idx]).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTransformReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub dropped_rows: u64,
    pub filled_values: u64,
    pub unfilled_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub rolling_window: usize,
    pub lag_hours: Vec<u32>,
    pub target_horizons_hours: Vec<u32>,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_window: 24,
            lag_hours: (1..=20).collect(),
            target_horizons_hours: vec![1, 3, 6, 12, 24],
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RollingStats {
    mean: f64,
    sum: f64,
    max: f64,
    min: f64,
}

/// Trailing window over one column; yields stats only once it holds
/// `size` defined samples.
#[derive(Debug, Clone)]
struct RollingWindow {
    values: VecDeque<Option<f64>>,
    size: usize,
}

impl RollingWindow {
    fn new(size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(size + 1),
            size,
        }
    }

    fn push(&mut self, value: Option<f64>) {
        self.values.push_back(value);
        while self.values.len() > self.size {
            self.values.pop_front();
        }
    }

    fn stats(&self) -> Option<RollingStats> {
        if self.values.len() < self.size {
            return None;
        }
        let mut sum = 0.0;
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for value in &self.values {
            let value = (*value)?;
            sum += value;
            max = max.max(value);
            min = min.min(value);
        }
        Some(RollingStats {
            mean: sum / self.size as f64,
            sum,
            max,
            min,
        })
    }
}

pub fn rolling_column_name(metric: &str, stat: &str, window: usize) -> String {
    format!("{metric}_rolling_{stat}_{window}")
}

pub fn lag_column_name(metric: &str, lag: u32) -> String {
    format!("{metric}_lag_{lag}")
}

pub fn target_column_name(horizon: u32) -> String {
    format!("{TARGET_PREFIX}{horizon}h")
}

/// Column layout for a transform over `metrics`; the label and target columns
/// only exist in train mode with a label present.
pub fn build_feature_schema(
    metrics: &MetricSet,
    label: Option<&str>,
    mode: DatasetMode,
    cfg: &FeatureConfig,
) -> FeatureSchema {
    let label = label.filter(|_| mode == DatasetMode::Train);
    let mut columns = Vec::new();

    for metric in metrics.names() {
        columns.push(FeatureColumn {
            name: metric.clone(),
            kind: ColumnKind::Source,
        });
    }
    if let Some(label) = label {
        columns.push(FeatureColumn {
            name: label.to_string(),
            kind: ColumnKind::Label,
        });
    }
    for name in CALENDAR_COLUMNS {
        columns.push(FeatureColumn {
            name: name.to_string(),
            kind: ColumnKind::Calendar,
        });
    }
    for metric in metrics.names() {
        for stat in ROLLING_STATS {
            columns.push(FeatureColumn {
                name: rolling_column_name(metric, stat, cfg.rolling_window),
                kind: ColumnKind::Rolling,
            });
        }
        for lag in &cfg.lag_hours {
            columns.push(FeatureColumn {
                name: lag_column_name(metric, *lag),
                kind: ColumnKind::Lag,
            });
        }
    }
    if label.is_some() {
        for horizon in &cfg.target_horizons_hours {
            columns.push(FeatureColumn {
                name: target_column_name(*horizon),
                kind: ColumnKind::Target,
            });
        }
    }

    let fingerprint = schema_fingerprint(cfg, &columns);
    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        mode = mode.as_str(),
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

pub fn transform(
    aligned: &AlignedTable,
    mode: DatasetMode,
    cfg: &FeatureConfig,
) -> Result<(FeatureTable, FeatureTransformReport), DatasetError> {
    validate_config(cfg)?;
    let width = aligned.metrics.len();
    if let Some((idx, record)) = aligned
        .records
        .iter()
        .enumerate()
        .find(|(_, record)| record.values.len() != width)
    {
        return Err(DatasetError::invalid(format!(
            "aligned row {idx} has {} values, expected {width}",
            record.values.len()
        )));
    }
    info!(
        component = "features",
        event = "features.transform.start",
        mode = mode.as_str(),
        input_rows = aligned.len(),
        label = aligned.label.as_deref().unwrap_or("none")
    );

    let schema = build_feature_schema(&aligned.metrics, aligned.label.as_deref(), mode, cfg);
    let label_name = aligned
        .label
        .as_deref()
        .filter(|_| mode == DatasetMode::Train);
    let timestamps: Vec<NaiveDateTime> = aligned.records.iter().map(|r| r.timestamp).collect();
    let row_count = timestamps.len();

    let mut report = FeatureTransformReport {
        input_rows: row_count as u64,
        output_rows: 0,
        dropped_rows: 0,
        filled_values: 0,
        unfilled_columns: Vec::new(),
    };

    let mut sources: Vec<Vec<Option<f64>>> = (0..aligned.metrics.len())
        .map(|col| aligned.records.iter().map(|r| r.values[col]).collect())
        .collect();
    for (name, column) in aligned.metrics.names().iter().zip(sources.iter_mut()) {
        fill_column(name, &timestamps, column, &mut report);
    }

    let label = match label_name {
        Some(name) => {
            let mut column: Vec<Option<f64>> = aligned.records.iter().map(|r| r.label).collect();
            fill_column(name, &timestamps, &mut column, &mut report);
            Some(column)
        }
        None => None,
    };

    let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(schema.columns.len());
    columns.extend(sources.iter().cloned());
    if let Some(label) = &label {
        columns.push(label.clone());
    }
    columns.push(timestamps.iter().map(|ts| Some(f64::from(ts.hour()))).collect());
    columns.push(
        timestamps
            .iter()
            .map(|ts| Some(f64::from(ts.weekday().num_days_from_monday())))
            .collect(),
    );
    columns.push(timestamps.iter().map(|ts| Some(f64::from(ts.month()))).collect());

    for source in &sources {
        let stats = rolling_stats(source, cfg.rolling_window);
        columns.push(stats.iter().map(|s| s.map(|s| s.mean)).collect());
        columns.push(stats.iter().map(|s| s.map(|s| s.sum)).collect());
        columns.push(stats.iter().map(|s| s.map(|s| s.max)).collect());
        columns.push(stats.iter().map(|s| s.map(|s| s.min)).collect());
        for lag in &cfg.lag_hours {
            columns.push(shift_ahead(source, *lag as usize));
        }
    }

    let mut keep = vec![true; row_count];
    if let Some(label) = &label {
        for horizon in &cfg.target_horizons_hours {
            let target = shift_ahead(label, *horizon as usize);
            for (flag, value) in keep.iter_mut().zip(&target) {
                if value.is_none() {
                    *flag = false;
                }
            }
            columns.push(target);
        }
    }

    debug_assert_eq!(columns.len(), schema.columns.len());

    let rows: Vec<FeatureRow> = (0..row_count)
        .filter(|idx| keep[*idx])
        .map(|idx| FeatureRow {
            timestamp: timestamps[idx],
            values: columns.iter().map(|column| column[idx]).collect(),
        })
        .collect();

    report.output_rows = rows.len() as u64;
    report.dropped_rows = report.input_rows - report.output_rows;

    info!(
        component = "features",
        event = "features.transform.finish",
        mode = mode.as_str(),
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        dropped_rows = report.dropped_rows,
        filled_values = report.filled_values,
        column_count = schema.columns.len()
    );

    Ok((FeatureTable { schema, rows }, report))
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), DatasetError> {
    if expected_version != actual.version {
        return Err(DatasetError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(DatasetError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Linear interpolation over time between known points, then forward and
/// backward fill for the edges. Returns how many cells were filled.
pub fn fill_missing(timestamps: &[NaiveDateTime], values: &mut [Option<f64>]) -> usize {
    let known: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| value.map(|_| idx))
        .collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return 0;
    };

    let mut filled = 0;
    for pair in known.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (Some(va), Some(vb)) = (values[a], values[b]) else {
            continue;
        };
        let span = (timestamps[b] - timestamps[a]).num_seconds() as f64;
        for idx in a + 1..b {
            let fraction = if span > 0.0 {
                (timestamps[idx] - timestamps[a]).num_seconds() as f64 / span
            } else {
                (idx - a) as f64 / (b - a) as f64
            };
            values[idx] = Some(va + (vb - va) * fraction);
            filled += 1;
        }
    }

    let head = values[first];
    for value in values[..first].iter_mut() {
        *value = head;
        filled += 1;
    }
    let tail = values[last];
    for value in values[last + 1..].iter_mut() {
        *value = tail;
        filled += 1;
    }
    filled
}

fn fill_column(
    name: &str,
    timestamps: &[NaiveDateTime],
    column: &mut [Option<f64>],
    report: &mut FeatureTransformReport,
) {
    report.filled_values += fill_missing(timestamps, column) as u64;
    if !column.is_empty() && column.iter().all(Option::is_none) {
        warn!(
            component = "features",
            event = "features.fill.unfilled_column",
            column = name,
            rows = column.len()
        );
        report.unfilled_columns.push(name.to_string());
    }
}

fn rolling_stats(values: &[Option<f64>], window: usize) -> Vec<Option<RollingStats>> {
    let mut state = RollingWindow::new(window);
    values
        .iter()
        .map(|value| {
            state.push(*value);
            state.stats()
        })
        .collect()
}

/// `out[i] = values[i + steps]`, missing past the end. Lag columns use this
/// too, so they carry later readings than their row.
fn shift_ahead(values: &[Option<f64>], steps: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| values.get(idx + steps).copied().flatten())
        .collect()
}

pub(crate) fn validate_config(cfg: &FeatureConfig) -> Result<(), DatasetError> {
    if cfg.rolling_window == 0 {
        return Err(DatasetError::invalid("rolling_window must be > 0"));
    }

    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(DatasetError::invalid(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }

    if cfg.lag_hours.is_empty() {
        return Err(DatasetError::invalid("lag_hours must not be empty"));
    }

    if cfg.target_horizons_hours.is_empty() {
        return Err(DatasetError::invalid("target_horizons_hours must not be empty"));
    }

    for (field, entries) in [
        ("lag_hours", &cfg.lag_hours),
        ("target_horizons_hours", &cfg.target_horizons_hours),
    ] {
        let mut seen = HashSet::new();
        for entry in entries {
            if *entry == 0 {
                return Err(DatasetError::invalid(format!("{field} entries must be > 0")));
            }
            if !seen.insert(*entry) {
                return Err(DatasetError::invalid(format!("{field} entries must be unique")));
            }
        }
    }

    Ok(())
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("rolling_window:{};", cfg.rolling_window));
    hasher.update("lags:");
    for lag in &cfg.lag_hours {
        hasher.update(format!("{lag},"));
    }
    hasher.update(";horizons:");
    for horizon in &cfg.target_horizons_hours {
        hasher.update(format!("{horizon},"));
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}
