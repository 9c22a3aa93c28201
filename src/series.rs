//! Time-series data model shared by the fetchers, the aligner and the
//! feature transform.

use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ordered, non-empty, duplicate-free list of metric names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSet {
    names: Vec<String>,
}

impl MetricSet {
    pub fn new<I, S>(names: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DatasetError::invalid("metric names must not be blank"));
            }
            if !seen.insert(name.clone()) {
                return Err(DatasetError::invalid(format!(
                    "metric '{name}' requested more than once"
                )));
            }
            out.push(name);
        }

        if out.is_empty() {
            return Err(DatasetError::invalid("at least one metric must be requested"));
        }

        Ok(Self { names: out })
    }

    /// Parses a comma-separated metric list such as `"temperature_2m,rain"`.
    pub fn parse(raw: &str) -> Result<Self, DatasetError> {
        Self::new(raw.split(',').filter(|part| !part.trim().is_empty()))
    }

    /// Temperature, humidity, apparent temperature and rain.
    pub fn standard() -> Self {
        Self::preset(&[
            "temperature_2m",
            "relative_humidity_2m",
            "apparent_temperature",
            "rain",
        ])
    }

    pub fn temperature() -> Self {
        Self::preset(&["temperature_2m", "apparent_temperature"])
    }

    pub fn rain() -> Self {
        Self::preset(&["rain"])
    }

    fn preset(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| (*name).to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn joined(&self) -> String {
        self.names.join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetMode {
    Train,
    Predict,
}

impl DatasetMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Predict => "predict",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DatasetError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "predict" => Ok(Self::Predict),
            other => Err(DatasetError::invalid(format!(
                "dataset mode must be 'train' or 'predict', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for DatasetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, DatasetError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
        DatasetError::invalid(format!("{field} '{raw}' is not a YYYY-MM-DD calendar date"))
    })
}

/// One row of a regular series; `values` follows the owning series' metric order.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// Hourly series with unique, strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularSeries {
    metrics: MetricSet,
    rows: Vec<Observation>,
}

impl RegularSeries {
    pub fn new(metrics: MetricSet, rows: Vec<Observation>) -> Result<Self, DatasetError> {
        for (idx, row) in rows.iter().enumerate() {
            if row.values.len() != metrics.len() {
                return Err(DatasetError::invalid(format!(
                    "row {idx} has {} values, expected {}",
                    row.values.len(),
                    metrics.len()
                )));
            }
        }
        if let Some(pair) = rows
            .windows(2)
            .find(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(DatasetError::invalid(format!(
                "regular series timestamps must be strictly increasing ({} then {})",
                pair[0].timestamp, pair[1].timestamp
            )));
        }

        Ok(Self { metrics, rows })
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, metric: &str) -> Option<f64> {
        let col = self.metrics.position(metric)?;
        self.rows.get(row).and_then(|obs| obs.values[col])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

/// Readings taken at arbitrary instants, one value per reading event.
#[derive(Debug, Clone, PartialEq)]
pub struct IrregularSeries {
    pub name: String,
    pub readings: Vec<Reading>,
}

impl IrregularSeries {
    pub fn new(name: impl Into<String>, readings: Vec<Reading>) -> Self {
        Self {
            name: name.into(),
            readings,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.readings
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// Stable ascending sort; readings sharing a timestamp keep their order.
    pub fn sort_ascending(&mut self) {
        self.readings.sort_by_key(|reading| reading.timestamp);
    }
}
