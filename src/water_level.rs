//! Windowed water-level collection from the civil-defence sensor page.
//!
//! The page only serves short ranges, so the requested range is cut into
//! fixed-size windows counted back from the end date. Windows are fetched one
//! at a time and their readings concatenated into a single ascending series.

use std::sync::OnceLock;

use chrono::{Days, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::DatasetError;
use crate::http::{HttpFetcher, ReqwestBlockingFetcher};
use crate::series::{IrregularSeries, Reading};

const SOURCE: &str = "water_level";
const READING_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";

pub const DEFAULT_WINDOW_DAYS: u32 = 3;
pub const WATER_LEVEL_SERIES: &str = "water_level";

pub const RIO_DO_SUL_LEVEL_URL_TEMPLATE: &str = "https://defesacivil.riodosul.sc.gov.br/index.php?r=externo%2Fmetragem-sensores&data_inicial-dreiksearch-data_inicial-disp={start_dmy}&DreikSearch%5Bdata_inicial%5D={start_iso}&DreikSearch%5Bdata_final%5D={end_iso}&DreikSearch%5Bintervalo%5D=60&DreikSearch%5Bordenacao%5D=3&data_final-dreiksearch-data_final-disp={end_dmy}&_tog1149016d=all&_pjax=%23kv-pjax-container-metragem-sensores";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSourceConfig {
    /// URL with `{start_dmy}`, `{start_iso}`, `{end_dmy}` and `{end_iso}` placeholders.
    pub url_template: String,
    pub window_days: u32,
    pub http_timeout_ms: u64,
}

impl Default for LevelSourceConfig {
    fn default() -> Self {
        Self {
            url_template: RIO_DO_SUL_LEVEL_URL_TEMPLATE.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            http_timeout_ms: 30_000,
        }
    }
}

/// Inclusive day range covered by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }
}

/// Splits `start..=end` into windows of `size` days, newest first. The oldest
/// window is clamped at `start` and may be shorter than `size`.
pub fn windows(start: NaiveDate, end: NaiveDate, size: u32) -> Vec<DateWindow> {
    if end < start || size == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut window_end = end;
    loop {
        let span = Days::new(u64::from(size) - 1);
        let window_start = match window_end.checked_sub_days(span) {
            Some(day) if day > start => day,
            _ => start,
        };
        out.push(DateWindow {
            start: window_start,
            end: window_end,
        });

        if window_start == start {
            break;
        }
        match window_start.pred_opt() {
            Some(prev) => window_end = prev,
            None => break,
        }
    }
    out
}

pub fn fetch_level_series(
    start: NaiveDate,
    end: NaiveDate,
    cfg: &LevelSourceConfig,
) -> Result<IrregularSeries, DatasetError> {
    validate_config(cfg)?;
    let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
    fetch_level_series_with_fetcher(start, end, cfg, &fetcher)
}

pub fn fetch_level_series_with_fetcher(
    start: NaiveDate,
    end: NaiveDate,
    cfg: &LevelSourceConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<IrregularSeries, DatasetError> {
    validate_config(cfg)?;
    let planned = windows(start, end, cfg.window_days);
    info!(
        component = "water_level",
        event = "water_level.fetch.start",
        start_date = %start,
        end_date = %end,
        window_days = cfg.window_days,
        window_count = planned.len()
    );

    if planned.is_empty() {
        warn!(
            component = "water_level",
            event = "water_level.fetch.empty_range",
            start_date = %start,
            end_date = %end
        );
        return Ok(IrregularSeries::new(WATER_LEVEL_SERIES, Vec::new()));
    }

    let mut readings = Vec::new();
    for window in &planned {
        let url = window_url(&cfg.url_template, window);
        let html = fetcher.get_text(&url)?;
        let mut parsed = parse_level_table(&html)?;
        debug!(
            component = "water_level",
            event = "water_level.window.fetched",
            window_start = %window.start,
            window_end = %window.end,
            readings = parsed.len()
        );
        readings.append(&mut parsed);
    }

    let mut series = IrregularSeries::new(WATER_LEVEL_SERIES, readings);
    series.sort_ascending();

    let missing_values = series
        .readings
        .iter()
        .filter(|reading| reading.value.is_none())
        .count();
    info!(
        component = "water_level",
        event = "water_level.fetch.finish",
        readings = series.len(),
        missing_values
    );
    Ok(series)
}

/// Fills the template placeholders for one window.
pub fn window_url(template: &str, window: &DateWindow) -> String {
    template
        .replace("{start_dmy}", &dmy_escaped(window.start))
        .replace("{end_dmy}", &dmy_escaped(window.end))
        .replace("{start_iso}", &window.start.format("%Y-%m-%d").to_string())
        .replace("{end_iso}", &window.end.format("%Y-%m-%d").to_string())
}

fn dmy_escaped(date: NaiveDate) -> String {
    date.format("%d%%2F%m%%2F%Y").to_string()
}

fn validate_config(cfg: &LevelSourceConfig) -> Result<(), DatasetError> {
    if cfg.window_days == 0 {
        return Err(DatasetError::invalid("window_days must be > 0"));
    }
    Ok(())
}

/// Reads the first table of the page: a header row, then (timestamp, level) rows.
pub fn parse_level_table(html: &str) -> Result<Vec<Reading>, DatasetError> {
    let body = table_regex()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| DatasetError::missing(SOURCE, "the readings table"))?
        .as_str();

    let mut readings = Vec::new();
    for row in row_regex().captures_iter(body).skip(1) {
        let cells: Vec<String> = cell_regex()
            .captures_iter(&row[1])
            .map(|cell| cell_text(&cell[1]))
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let timestamp = NaiveDateTime::parse_from_str(&cells[0], READING_TIME_FORMAT)
            .map_err(|_| {
                DatasetError::malformed(SOURCE, format!("invalid reading time '{}'", cells[0]))
            })?;
        readings.push(Reading {
            timestamp,
            value: parse_level(&cells[1]),
        });
    }

    Ok(readings)
}

/// Numeric level with either decimal separator; anything else is missing.
pub fn parse_level(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn cell_text(raw: &str) -> String {
    tag_regex()
        .replace_all(raw, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").expect("valid table regex"))
}

fn row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid row regex"))
}

fn cell_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").expect("valid cell regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::cell::RefCell;

    /// Serves each window newest day first, two readings share 05:00 per day.
    struct WindowedPageFetcher {
        urls: RefCell<Vec<String>>,
    }

    impl WindowedPageFetcher {
        fn new() -> Self {
            Self {
                urls: RefCell::new(Vec::new()),
            }
        }

        fn query_date(url: &str, key: &str) -> NaiveDate {
            let at = url.find(key).expect("query key present") + key.len();
            NaiveDate::parse_from_str(&url[at..at + 10], "%Y-%m-%d").expect("iso date")
        }
    }

    impl HttpFetcher for WindowedPageFetcher {
        fn get_text(&self, url: &str) -> Result<String, DatasetError> {
            self.urls.borrow_mut().push(url.to_string());
            let from = Self::query_date(url, "from=");
            let to = Self::query_date(url, "to=");

            let mut rows = String::new();
            let mut day = to;
            while day >= from {
                let dmy = day.format("%d/%m/%Y");
                let base = f64::from(day.day());
                rows.push_str(&format!("<tr><td>{dmy} 05:00</td><td>{}</td></tr>", base + 0.5));
                rows.push_str(&format!("<tr><td>{dmy} 05:00</td><td>{}</td></tr>", base + 0.7));
                rows.push_str(&format!("<tr><td>{dmy} 01:00</td><td>{}</td></tr>", base + 0.1));
                day = day.pred_opt().expect("valid previous day");
            }
            Ok(format!("<table><tr><th>Data</th><th>Nivel</th></tr>{rows}</table>"))
        }
    }

    fn paged_config() -> LevelSourceConfig {
        LevelSourceConfig {
            url_template: "http://level.test/?from={start_iso}&to={end_iso}".to_string(),
            ..LevelSourceConfig::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn windows_count_back_from_end_and_clamp_oldest() {
        let planned = windows(date(2024, 1, 1), date(2024, 1, 10), 3);
        assert_eq!(planned.len(), 4);
        assert_eq!(
            planned[0],
            DateWindow {
                start: date(2024, 1, 8),
                end: date(2024, 1, 10)
            }
        );
        assert_eq!(
            planned[3],
            DateWindow {
                start: date(2024, 1, 1),
                end: date(2024, 1, 1)
            }
        );
        let covered: u64 = planned.iter().map(DateWindow::days).sum();
        assert_eq!(covered, 10);
    }

    #[test]
    fn window_count_is_ceil_of_days_over_size() {
        let start = date(2023, 12, 20);
        for total_days in 1..=40u64 {
            let end = start.checked_add_days(Days::new(total_days - 1)).unwrap();
            for size in 1..=5u32 {
                let planned = windows(start, end, size);
                assert_eq!(planned.len() as u64, total_days.div_ceil(u64::from(size)));
                for pair in planned.windows(2) {
                    assert_eq!(pair[1].end.succ_opt().unwrap(), pair[0].start);
                }
            }
        }
    }

    #[test]
    fn reversed_range_has_no_windows() {
        assert!(windows(date(2024, 1, 2), date(2024, 1, 1), 3).is_empty());
        assert!(windows(date(2024, 1, 1), date(2024, 1, 1), 0).is_empty());
    }

    #[test]
    fn url_template_gets_both_date_formats() {
        let window = DateWindow {
            start: date(2023, 9, 29),
            end: date(2023, 10, 1),
        };
        let url = window_url("x?a={start_dmy}&b={start_iso}&c={end_dmy}&d={end_iso}", &window);
        assert_eq!(url, "x?a=29%2F09%2F2023&b=2023-09-29&c=01%2F10%2F2023&d=2023-10-01");
    }

    #[test]
    fn table_rows_become_readings_with_decimal_comma() {
        let html = r#"
            <html><body>
            <table class="kv-grid-table">
              <thead><tr><th>Data</th><th>N&iacute;vel</th></tr></thead>
              <tbody>
                <tr data-key="0"><td>01/10/2023 13:00</td><td>4,25</td></tr>
                <tr data-key="1"><td> 01/10/2023 12:00 </td><td><span>4.10</span></td></tr>
                <tr data-key="2"><td>01/10/2023 11:00</td><td>-</td></tr>
                <tr><td colspan="2">no data</td></tr>
              </tbody>
            </table>
            </body></html>
        "#;

        let readings = parse_level_table(html).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].value, Some(4.25));
        assert_eq!(readings[1].value, Some(4.10));
        assert_eq!(readings[2].value, None);
        assert_eq!(
            readings[1].timestamp,
            date(2023, 10, 1).and_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn page_without_table_is_missing_data() {
        let err = parse_level_table("<html><p>Sem dados</p></html>").unwrap_err();
        assert!(matches!(err, DatasetError::MissingData { .. }));
    }

    #[test]
    fn unparseable_reading_time_is_malformed() {
        let html = "<table><tr><th>Data</th></tr><tr><td>yesterday</td><td>1,0</td></tr></table>";
        let err = parse_level_table(html).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedRecord { .. }));
    }

    #[test]
    fn level_parsing_coerces_junk_to_missing() {
        assert_eq!(parse_level(" 3,5 "), Some(3.5));
        assert_eq!(parse_level("abc"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("NaN"), None);
    }

    #[test]
    fn windows_are_fetched_newest_first_and_merged_ascending() {
        let fetcher = WindowedPageFetcher::new();
        let (start, end) = (date(2024, 1, 1), date(2024, 1, 7));
        let series =
            fetch_level_series_with_fetcher(start, end, &paged_config(), &fetcher).unwrap();

        assert_eq!(
            *fetcher.urls.borrow(),
            vec![
                "http://level.test/?from=2024-01-05&to=2024-01-07",
                "http://level.test/?from=2024-01-02&to=2024-01-04",
                "http://level.test/?from=2024-01-01&to=2024-01-01",
            ]
        );
        assert_eq!(series.name, WATER_LEVEL_SERIES);
        assert_eq!(series.len(), 7 * 3);
        assert!(series.is_sorted());
        assert_eq!(
            series.readings[0].timestamp,
            date(2024, 1, 1).and_hms_opt(1, 0, 0).unwrap()
        );

        // Readings sharing a timestamp keep the order their page listed them in.
        for day in series.readings.chunks(3) {
            assert_eq!(day[1].timestamp, day[2].timestamp);
            let base = f64::from(day[1].timestamp.day());
            assert_eq!(day[1].value, Some(base + 0.5));
            assert_eq!(day[2].value, Some(base + 0.7));
        }
    }

    #[test]
    fn reversed_range_makes_no_requests() {
        let fetcher = WindowedPageFetcher::new();
        let (start, end) = (date(2024, 1, 5), date(2024, 1, 4));
        let series =
            fetch_level_series_with_fetcher(start, end, &paged_config(), &fetcher).unwrap();

        assert!(series.is_empty());
        assert!(fetcher.urls.borrow().is_empty());
    }

    #[test]
    fn zero_window_size_is_invalid_input() {
        let fetcher = WindowedPageFetcher::new();
        let cfg = LevelSourceConfig {
            window_days: 0,
            ..paged_config()
        };
        let (start, end) = (date(2024, 1, 1), date(2024, 1, 3));
        let err = fetch_level_series_with_fetcher(start, end, &cfg, &fetcher).unwrap_err();

        assert!(matches!(err, DatasetError::InvalidInput(_)));
        assert!(fetcher.urls.borrow().is_empty());
    }
}
