//! Generator configuration and its environment overrides.

use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::warn;

use crate::features::FeatureConfig;
use crate::series::MetricSet;
use crate::water_level::LevelSourceConfig;
use crate::weather::WeatherConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub weather: WeatherConfig,
    pub level: LevelSourceConfig,
    pub features: FeatureConfig,
    pub metrics: MetricSet,
    pub output_dir: PathBuf,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            weather: WeatherConfig::default(),
            level: LevelSourceConfig::default(),
            features: FeatureConfig::default(),
            metrics: MetricSet::standard(),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

/// Defaults overridden by `FLOODCAST_*` variables; unusable values are
/// ignored with a warning.
pub fn generator_config_from_env() -> GeneratorConfig {
    let mut config = GeneratorConfig::default();

    if let Some(latitude) = env_parsed::<f64>("FLOODCAST_LATITUDE") {
        config.weather.latitude = latitude;
    }
    if let Some(longitude) = env_parsed::<f64>("FLOODCAST_LONGITUDE") {
        config.weather.longitude = longitude;
    }
    if let Some(timezone) = env_parsed::<Tz>("FLOODCAST_TIMEZONE") {
        config.weather.timezone = timezone;
    }
    if let Some(url) = env_text("FLOODCAST_WEATHER_URL") {
        config.weather.base_url = url;
    }
    if let Some(template) = env_text("FLOODCAST_LEVEL_URL_TEMPLATE") {
        config.level.url_template = template;
    }
    if let Some(timeout_ms) = env_parsed::<u64>("FLOODCAST_HTTP_TIMEOUT_MS") {
        config.weather.http_timeout_ms = timeout_ms;
        config.level.http_timeout_ms = timeout_ms;
    }
    if let Some(raw) = env_text("FLOODCAST_METRICS") {
        match MetricSet::parse(&raw) {
            Ok(metrics) => config.metrics = metrics,
            Err(err) => warn!(
                component = "config",
                event = "config.env.ignored",
                key = "FLOODCAST_METRICS",
                reason = %err
            ),
        }
    }
    if let Some(dir) = env_text("FLOODCAST_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }

    config
}

fn env_text(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_text(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                component = "config",
                event = "config.env.ignored",
                key,
                value = %raw
            );
            None
        }
    }
}
