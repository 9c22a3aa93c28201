//! Hourly weather archive client.

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::DatasetError;
use crate::http::{url_with_query, HttpFetcher, ReqwestBlockingFetcher};
use crate::series::{parse_date, MetricSet, Observation, RegularSeries, DATE_FORMAT};

pub const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const SOURCE: &str = "weather";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherConfig {
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
    pub http_timeout_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: OPEN_METEO_ARCHIVE_URL.to_string(),
            latitude: -27.2142,
            longitude: -49.6431,
            timezone: chrono_tz::America::Sao_Paulo,
            http_timeout_ms: 30_000,
        }
    }
}

pub fn fetch_weather_series(
    start_date: &str,
    end_date: &str,
    metrics: &MetricSet,
    cfg: &WeatherConfig,
) -> Result<RegularSeries, DatasetError> {
    let (start, end) = validate_range(start_date, end_date)?;
    let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
    fetch_range(start, end, metrics, cfg, &fetcher)
}

pub fn fetch_weather_series_with_fetcher(
    start_date: &str,
    end_date: &str,
    metrics: &MetricSet,
    cfg: &WeatherConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<RegularSeries, DatasetError> {
    let (start, end) = validate_range(start_date, end_date)?;
    fetch_range(start, end, metrics, cfg, fetcher)
}

pub(crate) fn validate_range(
    start_date: &str,
    end_date: &str,
) -> Result<(NaiveDate, NaiveDate), DatasetError> {
    let start = parse_date("start_date", start_date)?;
    let end = parse_date("end_date", end_date)?;
    if end < start {
        return Err(DatasetError::invalid(format!(
            "end_date {end} is before start_date {start}"
        )));
    }
    Ok((start, end))
}

pub(crate) fn fetch_range(
    start: NaiveDate,
    end: NaiveDate,
    metrics: &MetricSet,
    cfg: &WeatherConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<RegularSeries, DatasetError> {
    let url = request_url(start, end, metrics, cfg)?;
    info!(
        component = "weather",
        event = "weather.fetch.start",
        start_date = %start,
        end_date = %end,
        metrics = %metrics.joined(),
        timezone = cfg.timezone.name()
    );

    let body = fetcher.get_text(&url)?;
    let series = parse_hourly_response(&body, metrics)?;

    info!(
        component = "weather",
        event = "weather.fetch.finish",
        rows = series.len(),
        metric_count = metrics.len()
    );
    Ok(series)
}

fn request_url(
    start: NaiveDate,
    end: NaiveDate,
    metrics: &MetricSet,
    cfg: &WeatherConfig,
) -> Result<String, DatasetError> {
    url_with_query(
        &cfg.base_url,
        &[
            ("latitude", cfg.latitude.to_string()),
            ("longitude", cfg.longitude.to_string()),
            ("start_date", start.format(DATE_FORMAT).to_string()),
            ("end_date", end.format(DATE_FORMAT).to_string()),
            ("timezone", cfg.timezone.name().to_string()),
            ("hourly", metrics.joined()),
        ],
    )
}

/// Turns the archive's `{"hourly": {"time": [...], "<metric>": [...]}}` payload
/// into a regular series holding exactly `metrics`, in that order.
pub fn parse_hourly_response(
    body: &str,
    metrics: &MetricSet,
) -> Result<RegularSeries, DatasetError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|err| DatasetError::malformed(SOURCE, format!("invalid JSON body: {err}")))?;
    let hourly = payload
        .get("hourly")
        .and_then(Value::as_object)
        .ok_or_else(|| DatasetError::missing(SOURCE, "the 'hourly' table"))?;

    let times = column_array(hourly, "time")?;
    let timestamps = times
        .iter()
        .map(|raw| {
            raw.as_str()
                .and_then(|text| NaiveDateTime::parse_from_str(text, TIME_FORMAT).ok())
                .ok_or_else(|| DatasetError::malformed(SOURCE, format!("invalid time value {raw}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns = Vec::with_capacity(metrics.len());
    for name in metrics.names() {
        let values = column_array(hourly, name)?;
        if values.len() != timestamps.len() {
            return Err(DatasetError::missing(
                SOURCE,
                format!(
                    "a full '{name}' column ({} values for {} timestamps)",
                    values.len(),
                    timestamps.len()
                ),
            ));
        }
        columns.push(values);
    }

    let rows = timestamps
        .into_iter()
        .enumerate()
        .map(|(idx, timestamp)| Observation {
            timestamp,
            values: columns.iter().map(|column| column[idx].as_f64()).collect(),
        })
        .collect();

    RegularSeries::new(metrics.clone(), rows)
}

fn column_array<'a>(
    hourly: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Vec<Value>, DatasetError> {
    hourly
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| DatasetError::missing(SOURCE, format!("the '{name}' column")))
}
