use std::cell::{Cell, RefCell};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use floodcast::{
    assemble_with_fetcher, load_dataset, AssembleRequest, DatasetError, DatasetMode,
    GeneratorConfig, HttpFetcher, MetricSet, Persist, TIME_COLUMN,
};

const WEATHER_BASE: &str = "http://weather.test/v1/archive";
const LEVEL_TEMPLATE: &str = "http://level.test/readings?from={start_iso}&to={end_iso}";

struct RoutingFetcher {
    hours: usize,
    fail_level_call: Option<usize>,
    weather_calls: Cell<usize>,
    level_calls: Cell<usize>,
    urls: RefCell<Vec<String>>,
}

impl RoutingFetcher {
    fn new(hours: usize) -> Self {
        Self {
            hours,
            fail_level_call: None,
            weather_calls: Cell::new(0),
            level_calls: Cell::new(0),
            urls: RefCell::new(Vec::new()),
        }
    }

    fn total_calls(&self) -> usize {
        self.weather_calls.get() + self.level_calls.get()
    }
}

impl HttpFetcher for RoutingFetcher {
    fn get_text(&self, url: &str) -> Result<String, DatasetError> {
        self.urls.borrow_mut().push(url.to_string());
        if url.starts_with(WEATHER_BASE) {
            self.weather_calls.set(self.weather_calls.get() + 1);
            return Ok(weather_body(self.hours));
        }
        if url.starts_with("http://level.test/") {
            let call = self.level_calls.get();
            self.level_calls.set(call + 1);
            if self.fail_level_call == Some(call) {
                return Err(DatasetError::Transport {
                    url: url.to_string(),
                    status: Some(503),
                    message: "service unavailable".to_string(),
                });
            }
            // Every window returns the same readings; duplicates collapse in alignment.
            return Ok(level_body(self.hours));
        }
        Err(DatasetError::Transport {
            url: url.to_string(),
            status: None,
            message: "unrouted".to_string(),
        })
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn weather_body(hours: usize) -> String {
    let times: Vec<String> = (0..hours)
        .map(|h| {
            (base_time() + Duration::hours(h as i64))
                .format("%Y-%m-%dT%H:%M")
                .to_string()
        })
        .collect();
    let series = |offset: f64| -> Vec<f64> {
        (0..hours).map(|h| offset + h as f64 * 0.1).collect()
    };

    serde_json::json!({
        "latitude": -27.2,
        "longitude": -49.6,
        "hourly": {
            "time": times,
            "temperature_2m": series(20.0),
            "relative_humidity_2m": series(80.0),
            "apparent_temperature": series(21.0),
            "rain": series(0.0),
        }
    })
    .to_string()
}

fn level_body(hours: usize) -> String {
    let mut rows = String::new();
    for h in (0..hours).rev() {
        let ts = base_time() + Duration::hours(h as i64) + Duration::minutes(10);
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{},{:02}</td></tr>",
            ts.format("%d/%m/%Y %H:%M"),
            3 + h / 10,
            h % 10 * 10
        ));
    }
    format!(
        "<html><body><table><thead><tr><th>Data</th><th>Nivel</th></tr></thead><tbody>{rows}</tbody></table></body></html>"
    )
}

fn test_config() -> GeneratorConfig {
    let mut cfg = GeneratorConfig::default();
    cfg.weather.base_url = WEATHER_BASE.to_string();
    cfg.level.url_template = LEVEL_TEMPLATE.to_string();
    cfg
}

fn request(mode: DatasetMode, start: &str, end: &str) -> AssembleRequest {
    AssembleRequest {
        start_date: start.to_string(),
        end_date: end.to_string(),
        mode,
        persist: Persist::Skip,
    }
}

#[test]
fn train_run_drops_rows_without_full_horizon_targets() {
    let fetcher = RoutingFetcher::new(30);
    let dataset = assemble_with_fetcher(
        &request(DatasetMode::Train, "2024-01-01", "2024-01-02"),
        &test_config(),
        &fetcher,
    )
    .expect("train assembly succeeds");

    assert_eq!(fetcher.weather_calls.get(), 1);
    assert_eq!(fetcher.level_calls.get(), 1);
    assert_eq!(dataset.report.input_rows, 30);
    assert_eq!(dataset.len(), 6);
    assert_eq!(dataset.report.dropped_rows, 24);

    let columns = dataset.column_names();
    assert_eq!(columns[0], TIME_COLUMN);
    assert_eq!(columns.len(), 1 + 109);
    assert!(columns.iter().any(|c| c == "water_level"));
    assert!(columns.iter().any(|c| c == "target_24h"));

    // Reading at 00:10 sits 10 minutes from the first row.
    let first = &dataset.table.rows[0];
    let label_idx = dataset.table.schema.column_index("water_level").unwrap();
    assert_eq!(first.values[label_idx], Some(3.0));
    let target_idx = dataset.table.schema.column_index("target_1h").unwrap();
    assert_eq!(first.values[target_idx], Some(3.1));
}

#[test]
fn predict_run_skips_level_source_and_targets() {
    let fetcher = RoutingFetcher::new(30);
    let dataset = assemble_with_fetcher(
        &request(DatasetMode::Predict, "2024-01-01", "2024-01-02"),
        &test_config(),
        &fetcher,
    )
    .expect("predict assembly succeeds");

    assert_eq!(fetcher.level_calls.get(), 0);
    assert_eq!(dataset.len(), 30);
    assert_eq!(dataset.report.dropped_rows, 0);

    let columns = dataset.column_names();
    assert!(!columns.iter().any(|c| c.starts_with("target_")));
    assert!(!columns.iter().any(|c| c == "water_level"));
    assert_eq!(columns.len(), 1 + 103);
}

#[test]
fn weather_request_carries_location_range_and_metrics() {
    let fetcher = RoutingFetcher::new(24);
    assemble_with_fetcher(
        &request(DatasetMode::Predict, "2024-01-01", "2024-01-01"),
        &test_config(),
        &fetcher,
    )
    .unwrap();

    let urls = fetcher.urls.borrow();
    let weather_url = &urls[0];
    assert!(weather_url.contains("start_date=2024-01-01"));
    assert!(weather_url.contains("end_date=2024-01-01"));
    assert!(weather_url.contains("timezone=America%2FSao_Paulo"));
    assert!(weather_url.contains(
        "hourly=temperature_2m%2Crelative_humidity_2m%2Capparent_temperature%2Crain"
    ));
}

#[test]
fn invalid_dates_fail_before_any_request() {
    let fetcher = RoutingFetcher::new(30);
    let cfg = test_config();

    let err = assemble_with_fetcher(
        &request(DatasetMode::Train, "2024-13-01", "2024-12-31"),
        &cfg,
        &fetcher,
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::InvalidInput(_)));

    let err = assemble_with_fetcher(
        &request(DatasetMode::Train, "2024-02-10", "2024-02-01"),
        &cfg,
        &fetcher,
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::InvalidInput(_)));

    assert_eq!(fetcher.total_calls(), 0);
}

#[test]
fn empty_metric_set_is_rejected() {
    let err = MetricSet::new(Vec::<String>::new()).unwrap_err();
    assert!(matches!(err, DatasetError::InvalidInput(_)));
    assert!(MetricSet::parse(" , ").is_err());
}

#[test]
fn failing_level_window_aborts_assembly() {
    let mut fetcher = RoutingFetcher::new(240);
    fetcher.fail_level_call = Some(1);

    let err = assemble_with_fetcher(
        &request(DatasetMode::Train, "2024-01-01", "2024-01-10"),
        &test_config(),
        &fetcher,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        DatasetError::Transport {
            status: Some(503),
            ..
        }
    ));
    assert_eq!(fetcher.level_calls.get(), 2);
}

#[test]
fn persisted_dataset_loads_back_with_same_shape() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = RoutingFetcher::new(30);
    let mut req = request(DatasetMode::Train, "2024-01-01", "2024-01-02");
    req.persist = Persist::Directory(dir.path().join("output"));

    let dataset = assemble_with_fetcher(&req, &test_config(), &fetcher).unwrap();
    let path = dataset.persisted_to.clone().expect("dataset was persisted");
    assert_eq!(
        path,
        dir.path()
            .join("output")
            .join("train_data_2024-01-01_2024-01-02.csv")
    );

    let loaded = load_dataset(&path).unwrap();
    assert_eq!(loaded.mode, DatasetMode::Train);
    assert_eq!(loaded.columns, dataset.column_names());
    assert_eq!(loaded.rows.len(), dataset.len());
    assert_eq!(loaded.rows[0].timestamp, dataset.table.rows[0].timestamp);
}

#[test]
fn predict_output_file_reads_back_as_predict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.csv");
    let fetcher = RoutingFetcher::new(26);
    let mut req = request(DatasetMode::Predict, "2024-01-01", "2024-01-02");
    req.persist = Persist::File(path.clone());

    let dataset = assemble_with_fetcher(&req, &test_config(), &fetcher).unwrap();
    assert_eq!(dataset.persisted_to.as_deref(), Some(path.as_path()));

    let loaded = load_dataset(&path).unwrap();
    assert_eq!(loaded.mode, DatasetMode::Predict);
    assert_eq!(loaded.rows.len(), 26);
}
