//! Blocking HTTP transport used by both sources.

use std::time::Duration;

use tracing::debug;

use crate::error::DatasetError;

/// Transport seam: returns the body of a successful GET, anything else is an error.
pub trait HttpFetcher {
    fn get_text(&self, url: &str) -> Result<String, DatasetError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self, DatasetError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| DatasetError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_text(&self, url: &str) -> Result<String, DatasetError> {
        debug!(component = "http", event = "http.get", url = %url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DatasetError::Transport {
                url: url.to_string(),
                status: None,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Transport {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response.text().map_err(|err| DatasetError::Transport {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: err.to_string(),
        })
    }
}

/// Builds `base?key=value&...` with each pair percent-encoded.
pub fn url_with_query(base: &str, pairs: &[(&str, String)]) -> Result<String, DatasetError> {
    let url = reqwest::Url::parse_with_params(base, pairs.iter().map(|(k, v)| (*k, v.as_str())))
        .map_err(|err| DatasetError::invalid(format!("invalid source URL '{base}': {err}")))?;
    Ok(url.to_string())
}
