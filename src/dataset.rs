//! End-to-end dataset generation: fetch, align, derive features, persist.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::align::align;
use crate::config::GeneratorConfig;
use crate::error::DatasetError;
use crate::features::{
    transform, validate_config, FeatureRow, FeatureTable, FeatureTransformReport, TARGET_PREFIX,
    TIME_COLUMN,
};
use crate::http::{HttpFetcher, ReqwestBlockingFetcher};
use crate::series::DatasetMode;
use crate::water_level::fetch_level_series_with_fetcher;
use crate::weather::{fetch_range, validate_range};

const PERSISTED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SOURCE: &str = "dataset";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persist {
    Skip,
    /// Write `{mode}_data_{start}_{end}.csv` inside this directory.
    Directory(PathBuf),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleRequest {
    pub start_date: String,
    pub end_date: String,
    pub mode: DatasetMode,
    pub persist: Persist,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub mode: DatasetMode,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub table: FeatureTable,
    pub report: FeatureTransformReport,
    pub persisted_to: Option<PathBuf>,
}

impl Dataset {
    /// Header of the persisted file, time column first.
    pub fn column_names(&self) -> Vec<String> {
        header(&self.table)
    }

    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }
}

/// A dataset read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedDataset {
    pub mode: DatasetMode,
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

pub fn default_file_name(mode: DatasetMode, start: NaiveDate, end: NaiveDate) -> String {
    format!("{mode}_data_{start}_{end}.csv")
}

pub fn assemble(req: &AssembleRequest, cfg: &GeneratorConfig) -> Result<Dataset, DatasetError> {
    validate_range(&req.start_date, &req.end_date)?;
    let weather_fetcher = ReqwestBlockingFetcher::new(cfg.weather.http_timeout_ms)?;
    let level_fetcher = ReqwestBlockingFetcher::new(cfg.level.http_timeout_ms)?;
    run(req, cfg, &weather_fetcher, &level_fetcher)
}

pub fn assemble_with_fetcher(
    req: &AssembleRequest,
    cfg: &GeneratorConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<Dataset, DatasetError> {
    run(req, cfg, fetcher, fetcher)
}

fn run(
    req: &AssembleRequest,
    cfg: &GeneratorConfig,
    weather_fetcher: &dyn HttpFetcher,
    level_fetcher: &dyn HttpFetcher,
) -> Result<Dataset, DatasetError> {
    let (start, end) = validate_range(&req.start_date, &req.end_date)?;
    validate_config(&cfg.features)?;
    if cfg.level.window_days == 0 {
        return Err(DatasetError::invalid("window_days must be > 0"));
    }

    info!(
        component = "dataset",
        event = "dataset.assemble.start",
        mode = req.mode.as_str(),
        start_date = %start,
        end_date = %end
    );

    let weather = fetch_range(start, end, &cfg.metrics, &cfg.weather, weather_fetcher)?;
    let levels = match req.mode {
        DatasetMode::Train => Some(fetch_level_series_with_fetcher(
            start,
            end,
            &cfg.level,
            level_fetcher,
        )?),
        DatasetMode::Predict => None,
    };

    let aligned = align(&weather, levels.as_ref());
    let (table, report) = transform(&aligned, req.mode, &cfg.features)?;

    let target = match &req.persist {
        Persist::Skip => None,
        Persist::Directory(dir) => Some(dir.join(default_file_name(req.mode, start, end))),
        Persist::File(path) => Some(path.clone()),
    };
    if let Some(path) = &target {
        persist_table(&table, path)?;
    }

    info!(
        component = "dataset",
        event = "dataset.assemble.finish",
        mode = req.mode.as_str(),
        rows = table.rows.len(),
        columns = table.schema.columns.len() + 1,
        persisted = target.is_some()
    );

    Ok(Dataset {
        mode: req.mode,
        start_date: start,
        end_date: end,
        table,
        report,
        persisted_to: target,
    })
}

/// Writes the table as CSV; missing values become empty cells.
pub fn persist_table(table: &FeatureTable, path: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header(table))?;
    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.timestamp.format(PERSISTED_TIME_FORMAT).to_string());
        record.extend(
            row.values
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| DatasetError::Io(err.into_error()))?;

    write_atomic(path, &bytes)?;
    info!(
        component = "dataset",
        event = "dataset.persisted",
        path = %path.display(),
        rows = table.rows.len(),
        bytes = bytes.len()
    );
    Ok(())
}

pub fn load_dataset(path: &Path) -> Result<PersistedDataset, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.first().map(String::as_str) != Some(TIME_COLUMN) {
        return Err(DatasetError::malformed(
            SOURCE,
            format!("first column of {} must be '{TIME_COLUMN}'", path.display()),
        ));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let raw_ts = record.get(0).unwrap_or_default();
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, PERSISTED_TIME_FORMAT)
            .map_err(|_| DatasetError::malformed(SOURCE, format!("invalid time '{raw_ts}'")))?;
        let values = record
            .iter()
            .skip(1)
            .map(|cell| {
                if cell.is_empty() {
                    Ok(None)
                } else {
                    cell.parse::<f64>().map(Some).map_err(|_| {
                        DatasetError::malformed(SOURCE, format!("invalid number '{cell}'"))
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(FeatureRow { timestamp, values });
    }

    let mode = if columns.iter().any(|name| name.starts_with(TARGET_PREFIX)) {
        DatasetMode::Train
    } else {
        DatasetMode::Predict
    };

    Ok(PersistedDataset {
        mode,
        columns,
        rows,
    })
}

fn header(table: &FeatureTable) -> Vec<String> {
    std::iter::once(TIME_COLUMN.to_string())
        .chain(table.schema.names().map(str::to_string))
        .collect()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DatasetError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| DatasetError::invalid(format!("invalid output path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
