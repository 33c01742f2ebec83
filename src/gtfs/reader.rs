//! Archive extraction and CSV parsing for static GTFS feeds.
//!
//! Everything here is blocking I/O; async callers run it on
//! `tokio::task::spawn_blocking`.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::filter::FeedFilter;
use super::time::GtfsTime;
use super::{Agency, CalendarDate, GtfsFeed, Route, Stop, StopTime, Trip};
use crate::error::FeedError;

pub const AGENCY: &str = "agency.txt";
pub const STOPS: &str = "stops.txt";
pub const ROUTES: &str = "routes.txt";
pub const TRIPS: &str = "trips.txt";
pub const STOP_TIMES: &str = "stop_times.txt";
pub const CALENDAR_DATES: &str = "calendar_dates.txt";

/// Upper bound on the total uncompressed size of a feed archive (2 GB).
pub const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Unpacks the zip at `zip_path` into `dest`.
///
/// # Errors
///
/// Fails on an unreadable archive or once more than
/// [`MAX_DECOMPRESSED_SIZE`] bytes have been written.
pub fn extract_archive(zip_path: &Path, dest: &Path) -> Result<(), FeedError> {
    extract_with_limit(zip_path, dest, MAX_DECOMPRESSED_SIZE)
}

/// Sizes in the central directory are whatever the archive claims, so the
/// limit is enforced on the bytes actually decompressed.
fn extract_with_limit(zip_path: &Path, dest: &Path, limit: u64) -> Result<(), FeedError> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let mut written: u64 = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let remaining = limit - written;
        let mut out = File::create(&out_path)?;
        // one byte past the budget is enough to detect an overrun
        let copied = io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;
        written += copied;
        if copied > remaining {
            return Err(FeedError::TooLarge {
                size: written,
                limit,
            });
        }
    }

    info!(
        entries = archive.len(),
        decompressed_kb = written / 1024,
        "Extracted GTFS archive"
    );
    Ok(())
}

/// Parses the extracted feed in `dir`, applying `filter` while reading.
///
/// The result equals [`FeedFilter::apply`] on the unfiltered feed, without
/// holding dropped rows in memory. Trips are read and filtered in full
/// before `stop_times.txt` is opened, since stop-times are kept by
/// membership in the surviving trip set.
/// Every stop-time's arrival and departure are validated as GTFS times,
/// including rows the filter then drops.
pub fn read_feed(dir: &Path, filter: &FeedFilter) -> Result<GtfsFeed, FeedError> {
    let agencies: Vec<Agency> = required(dir, AGENCY, |_, _| Ok(true))?;
    check_timezones(&agencies)?;

    let stops: Vec<Stop> = required(dir, STOPS, |_, stop| Ok(filter.keeps_stop(stop)))?;
    let routes: Vec<Route> = required(dir, ROUTES, |_, _| Ok(true))?;
    let trips: Vec<Trip> = required(dir, TRIPS, |_, trip| Ok(filter.keeps_trip(trip)))?;

    let surviving = FeedFilter::surviving_trip_ids(&trips);
    let stop_times: Vec<StopTime> = required(dir, STOP_TIMES, |line, stop_time: &StopTime| {
        for raw in [&stop_time.arrival_time, &stop_time.departure_time]
            .into_iter()
            .flatten()
        {
            GtfsTime::parse(raw).map_err(|_| FeedError::InvalidTime {
                file: STOP_TIMES,
                line,
                value: raw.clone(),
            })?;
        }
        Ok(FeedFilter::keeps_stop_time(&surviving, stop_time))
    })?;

    let calendar_dates: Vec<CalendarDate> = optional(dir, CALENDAR_DATES, |_, _| Ok(true))?;

    Ok(GtfsFeed {
        agencies,
        stops,
        routes,
        trips,
        stop_times,
        calendar_dates,
    })
}

/// Every agency timezone must be a known IANA zone. All times are read in a
/// single zone, so agencies that disagree are reported.
fn check_timezones(agencies: &[Agency]) -> Result<(), FeedError> {
    let mut zones = BTreeSet::new();
    for agency in agencies {
        agency
            .agency_timezone
            .parse::<Tz>()
            .map_err(|_| FeedError::InvalidTimezone(agency.agency_timezone.clone()))?;
        zones.insert(agency.agency_timezone.as_str());
    }
    if zones.len() > 1 {
        warn!(?zones, "Feed agencies use more than one timezone; only the first is used");
    }
    Ok(())
}

fn required<T, F>(dir: &Path, file: &'static str, keep: F) -> Result<Vec<T>, FeedError>
where
    T: DeserializeOwned,
    F: FnMut(u64, &T) -> Result<bool, FeedError>,
{
    read_table(dir, file, keep)?.ok_or(FeedError::MissingFile(file))
}

fn optional<T, F>(dir: &Path, file: &'static str, keep: F) -> Result<Vec<T>, FeedError>
where
    T: DeserializeOwned,
    F: FnMut(u64, &T) -> Result<bool, FeedError>,
{
    match read_table(dir, file, keep)? {
        Some(rows) => Ok(rows),
        None => {
            warn!(file, "Optional GTFS file not found, skipping");
            Ok(Vec::new())
        }
    }
}

/// Reads one table, or `None` if the file is absent. `keep` receives the
/// 1-based line number of each row and decides whether the row is kept.
fn read_table<T, F>(dir: &Path, file: &'static str, mut keep: F) -> Result<Option<Vec<T>>, FeedError>
where
    T: DeserializeOwned,
    F: FnMut(u64, &T) -> Result<bool, FeedError>,
{
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&path)
        .map_err(|source| FeedError::Csv { file, source })?;

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (index, result) in reader.deserialize::<T>().enumerate() {
        let row = result.map_err(|source| FeedError::Csv { file, source })?;
        // line 1 is the header
        let line = index as u64 + 2;
        if keep(line, &row)? {
            rows.push(row);
        } else {
            dropped += 1;
        }
    }

    info!(file, kept = rows.len(), dropped, "Parsed GTFS table");
    Ok(Some(rows))
}
