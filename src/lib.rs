//! Floodcast dataset generator.
//!
//! Pipeline stages:
//! - hourly weather archive fetch (`weather`)
//! - windowed river-level table scrape (`water_level`)
//! - nearest-match alignment of levels onto the weather timeline (`align`)
//! - feature derivation and target generation (`features`)
//! - orchestration and CSV persistence (`dataset`)

mod align;
mod config;
mod dataset;
mod error;
mod features;
mod http;
mod observability;
mod series;
mod water_level;
mod weather;

pub use align::{
    align, align_with_tolerance, AlignedRecord, AlignedTable, DEFAULT_TOLERANCE_MINUTES,
};
pub use config::{generator_config_from_env, GeneratorConfig};
pub use dataset::{
    assemble, assemble_with_fetcher, default_file_name, load_dataset, persist_table,
    AssembleRequest, Dataset, Persist, PersistedDataset,
};
pub use error::DatasetError;
pub use features::{
    assert_schema_compatible, build_feature_schema, fill_missing, lag_column_name,
    rolling_column_name, target_column_name, transform, ColumnKind, FeatureColumn, FeatureConfig,
    FeatureRow, FeatureSchema, FeatureTable, FeatureTransformReport, FEATURE_SCHEMA_VERSION,
    TARGET_PREFIX, TIME_COLUMN,
};
pub use http::{url_with_query, HttpFetcher, ReqwestBlockingFetcher};
pub use observability::{
    init_logging, log_app_start, log_run_finished, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use series::{
    parse_date, DatasetMode, IrregularSeries, MetricSet, Observation, Reading, RegularSeries,
    DATE_FORMAT,
};
pub use water_level::{
    fetch_level_series, fetch_level_series_with_fetcher, parse_level, parse_level_table,
    window_url, windows, DateWindow, LevelSourceConfig, DEFAULT_WINDOW_DAYS,
    RIO_DO_SUL_LEVEL_URL_TEMPLATE, WATER_LEVEL_SERIES,
};
pub use weather::{
    fetch_weather_series, fetch_weather_series_with_fetcher, parse_hourly_response,
    WeatherConfig, OPEN_METEO_ARCHIVE_URL,
};
