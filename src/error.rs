//! Error types for each layer of the ingestion and query pipeline.
//!
//! The library returns these typed errors; the binary wraps them in
//! [`anyhow::Error`] at the boundary.

use reqwest::StatusCode;

/// A GTFS time string that could not be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid GTFS time '{0}'")]
pub struct TimeError(pub String);

/// Failures while downloading a feed archive.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid feed url '{0}'")]
    InvalidUrl(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed download returned HTTP {0}")]
    Status(StatusCode),
    #[error("failed to write feed archive: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while extracting or parsing a downloaded feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive decompresses past {limit} bytes (stopped at {size} bytes)")]
    TooLarge { size: u64, limit: u64 },
    #[error("required file {0} is missing from the feed")]
    MissingFile(&'static str),
    #[error("{file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("{file} line {line}: invalid time '{value}'")]
    InvalidTime {
        file: &'static str,
        line: u64,
        value: String,
    },
    #[error("agency.txt: unknown timezone '{0}'")]
    InvalidTimezone(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure that aborts a feed load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("feed parsing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures on the import ledger read path.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The caller's key did not match the configured ledger key.
    #[error("unauthorized")]
    Unauthorized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
