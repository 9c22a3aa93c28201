//! Shared error type for every stage of dataset generation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("{source_name} response is missing {detail}")]
    MissingData {
        source_name: &'static str,
        detail: String,
    },
    #[error("malformed {source_name} record: {detail}")]
    MalformedRecord {
        source_name: &'static str,
        detail: String,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DatasetError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub(crate) fn missing(source_name: &'static str, detail: impl Into<String>) -> Self {
        Self::MissingData {
            source_name,
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(source_name: &'static str, detail: impl Into<String>) -> Self {
        Self::MalformedRecord {
            source_name,
            detail: detail.into(),
        }
    }
}
