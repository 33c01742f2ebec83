//! Runtime configuration from environment variables and the filter file.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::departures::ServicePatterns;
use crate::gtfs::filter::FeedFilter;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://departures.db?mode=rwc";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Feed loaded when no URL is given on the command line.
    pub gtfs_url: Option<String>,
    /// Used until a feed with an agency timezone has been loaded.
    pub agency_timezone: Tz,
    /// When set, ledger reads must present this key.
    pub ledger_api_key: Option<String>,
    pub max_concurrent_loads: usize,
    pub feed_timeout: Duration,
    pub filter: FeedFilter,
    pub service_patterns: ServicePatterns,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let agency_timezone = match var("AGENCY_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| anyhow::anyhow!("AGENCY_TIMEZONE '{name}' is not an IANA timezone"))?,
            None => DEFAULT_TIMEZONE,
        };

        let max_concurrent_loads = match var("MAX_CONCURRENT_LOADS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("MAX_CONCURRENT_LOADS '{raw}' is not a number"))?
                .max(1),
            None => 1,
        };

        let feed_timeout_secs = match var("FEED_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("FEED_TIMEOUT_SECS '{raw}' is not a number"))?,
            None => DEFAULT_FEED_TIMEOUT_SECS,
        };

        let filter_file = match var("FEED_FILTER_PATH") {
            Some(path) => FilterFile::load(&path)?,
            None => FilterFile::default(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            gtfs_url: var("GTFS_URL"),
            agency_timezone,
            ledger_api_key: var("LEDGER_API_KEY"),
            max_concurrent_loads,
            feed_timeout: Duration::from_secs(feed_timeout_secs),
            filter: filter_file.filter(),
            service_patterns: filter_file.service_patterns,
        })
    }
}

/// Which routes and stops to keep, and how days map to service ids.
///
/// Stored as JSON on disk. Omitted keys fall back to the defaults:
/// ```json
/// {
///   "route_ids": ["21", "237", "234"],
///   "stop_codes": ["20714", "21073", "21055"],
///   "service_patterns": { "saturday": "1", "sunday": "2", "weekday": "3" }
/// }
/// ```
/// An empty list keeps every route or stop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterFile {
    pub route_ids: BTreeSet<String>,
    pub stop_codes: BTreeSet<String>,
    pub service_patterns: ServicePatterns,
}

impl Default for FilterFile {
    fn default() -> Self {
        let filter = FeedFilter::deployment_default();
        Self {
            route_ids: filter.route_ids,
            stop_codes: filter.stop_codes,
            service_patterns: ServicePatterns::default(),
        }
    }
}

impl FilterFile {
    /// Loads the filter from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading filter file {}", path.display()))?;
        let file: FilterFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing filter file {}", path.display()))?;
        Ok(file)
    }

    pub fn filter(&self) -> FeedFilter {
        FeedFilter::new(self.route_ids.iter().cloned(), self.stop_codes.iter().cloned())
    }
}
