//! Feed ingestion: download, extract, parse and atomically replace.
//!
//! A load either replaces every GTFS table and appends a successful import
//! record in one transaction, or leaves the stored feed untouched and
//! appends a failure record.

use std::path::Path;

use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{error, info};

use crate::error::{FeedError, LoadError};
use crate::fetch::{HttpClient, download_to_file};
use crate::gtfs::filter::FeedFilter;
use crate::gtfs::reader::{extract_archive, read_feed};
use crate::gtfs::GtfsFeed;
use crate::ledger;
use crate::store::{GTFS_TABLES, Store};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`.
const MAX_BIND_PARAMS: usize = 32766;

/// Row counts written by one successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub import_id: i64,
    pub agencies: u64,
    pub stops: u64,
    pub routes: u64,
    pub trips: u64,
    pub stop_times: u64,
    pub calendar_dates: u64,
}

pub struct FeedLoader<C: HttpClient> {
    client: C,
    store: Store,
    filter: FeedFilter,
}

impl<C: HttpClient> FeedLoader<C> {
    pub fn new(client: C, store: Store, filter: FeedFilter) -> Self {
        Self {
            client,
            store,
            filter,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Loads from a URL when `source` is an `http(s)://` URL, otherwise from
    /// a local zip archive at that path.
    pub async fn load_source(&self, source: &str) -> Result<LoadSummary, LoadError> {
        if is_remote(source) {
            self.load_url(source).await
        } else {
            self.load_archive(Path::new(source), source).await
        }
    }

    /// Downloads the feed zip at `url` and replaces the stored feed with it.
    ///
    /// Every attempt is recorded in the import ledger under `url`.
    #[tracing::instrument(skip(self), fields(source = %url))]
    pub async fn load_url(&self, url: &str) -> Result<LoadSummary, LoadError> {
        let result = self.try_load_url(url).await;
        self.finish(url, result).await
    }

    /// Replaces the stored feed with a zip archive already on disk, recorded
    /// in the ledger under `source`.
    #[tracing::instrument(skip(self, path), fields(archive = %path.display()))]
    pub async fn load_archive(&self, path: &Path, source: &str) -> Result<LoadSummary, LoadError> {
        let result = self.ingest(path, source).await;
        self.finish(source, result).await
    }

    async fn try_load_url(&self, url: &str) -> Result<LoadSummary, LoadError> {
        let workdir = scratch_dir()?;
        let archive = workdir.path().join("gtfs.zip");

        let bytes = download_to_file(&self.client, url, &archive).await?;
        info!(bytes, "Downloaded feed archive");

        self.ingest(&archive, url).await
    }

    /// Extracts and parses on the blocking pool, then writes the feed.
    async fn ingest(&self, archive: &Path, source: &str) -> Result<LoadSummary, LoadError> {
        let workdir = scratch_dir()?;
        let dest = workdir.path().to_path_buf();
        let archive = archive.to_path_buf();
        let filter = self.filter.clone();

        let feed = tokio::task::spawn_blocking(move || {
            extract_archive(&archive, &dest)?;
            read_feed(&dest, &filter)
        })
        .await??;

        Ok(replace_feed(&self.store, &feed, source).await?)
    }

    async fn finish(
        &self,
        source: &str,
        result: Result<LoadSummary, LoadError>,
    ) -> Result<LoadSummary, LoadError> {
        match &result {
            Ok(summary) => info!(
                import_id = summary.import_id,
                stops = summary.stops,
                trips = summary.trips,
                stop_times = summary.stop_times,
                "Feed load complete"
            ),
            Err(e) => {
                error!(error = %e, "Feed load failed");
                if let Err(db) = ledger::record_failure(self.store.pool(), source, &e.to_string()).await
                {
                    error!(error = %db, "Failed to record failed import");
                }
            }
        }
        result
    }
}

fn is_remote(source: &str) -> bool {
    reqwest::Url::parse(source).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// A private directory removed when the handle drops.
fn scratch_dir() -> Result<tempfile::TempDir, FeedError> {
    Ok(tempfile::Builder::new().prefix("gtfs-").tempdir()?)
}

/// Replaces every GTFS table with `feed` and records a successful import of
/// `source`, all in one transaction.
///
/// Foreign keys are checked at commit, so the tables can be cleared and
/// refilled in any order. Any error rolls the whole replacement back and no
/// import record is written.
pub async fn replace_feed(
    store: &Store,
    feed: &GtfsFeed,
    source: &str,
) -> Result<LoadSummary, sqlx::Error> {
    let mut tx = store.pool().begin().await?;

    sqlx::query("PRAGMA defer_foreign_keys = ON")
        .execute(&mut *tx)
        .await?;
    for table in GTFS_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
            .bind(*table)
            .execute(&mut *tx)
            .await?;
    }

    let agencies = bulk_insert(
        &mut *tx,
        "agency",
        &[
            "agency_id",
            "agency_name",
            "agency_url",
            "agency_timezone",
            "agency_lang",
            "agency_phone",
            "agency_fare_url",
            "agency_email",
        ],
        &feed.agencies,
        |mut row, agency| {
            row.push_bind(agency.agency_id.as_deref())
                .push_bind(agency.agency_name.as_str())
                .push_bind(agency.agency_url.as_str())
                .push_bind(agency.agency_timezone.as_str())
                .push_bind(agency.agency_lang.as_deref())
                .push_bind(agency.agency_phone.as_deref())
                .push_bind(agency.agency_fare_url.as_deref())
                .push_bind(agency.agency_email.as_deref());
        },
    )
    .await?;

    let stops = bulk_insert(
        &mut *tx,
        "stops",
        &[
            "stop_id",
            "stop_code",
            "stop_name",
            "stop_desc",
            "stop_lat",
            "stop_lon",
            "zone_id",
            "stop_url",
            "location_type",
            "parent_station",
            "stop_timezone",
            "wheelchair_boarding",
        ],
        &feed.stops,
        |mut row, stop| {
            row.push_bind(stop.stop_id.as_str())
                .push_bind(stop.stop_code.as_deref())
                .push_bind(stop.stop_name.as_deref())
                .push_bind(stop.stop_desc.as_deref())
                .push_bind(stop.stop_lat)
                .push_bind(stop.stop_lon)
                .push_bind(stop.zone_id.as_deref())
                .push_bind(stop.stop_url.as_deref())
                .push_bind(stop.location_type)
                .push_bind(stop.parent_station.as_deref())
                .push_bind(stop.stop_timezone.as_deref())
                .push_bind(stop.wheelchair_boarding);
        },
    )
    .await?;

    let routes = bulk_insert(
        &mut *tx,
        "routes",
        &[
            "route_id",
            "agency_id",
            "route_short_name",
            "route_long_name",
            "route_desc",
            "route_type",
            "route_url",
            "route_color",
            "route_text_color",
        ],
        &feed.routes,
        |mut row, route| {
            row.push_bind(route.route_id.as_str())
                .push_bind(route.agency_id.as_deref())
                .push_bind(route.route_short_name.as_deref())
                .push_bind(route.route_long_name.as_deref())
                .push_bind(route.route_desc.as_deref())
                .push_bind(route.route_type)
                .push_bind(route.route_url.as_deref())
                .push_bind(route.route_color.as_deref())
                .push_bind(route.route_text_color.as_deref());
        },
    )
    .await?;

    let calendar_dates = bulk_insert(
        &mut *tx,
        "calendar_dates",
        &["service_id", "date", "exception_type"],
        &feed.calendar_dates,
        |mut row, date| {
            row.push_bind(date.service_id.as_str())
                .push_bind(date.date)
                .push_bind(date.exception_type);
        },
    )
    .await?;

    let trips = bulk_insert(
        &mut *tx,
        "trips",
        &[
            "trip_id",
            "route_id",
            "service_id",
            "trip_headsign",
            "trip_short_name",
            "direction_id",
            "block_id",
            "shape_id",
            "wheelchair_accessible",
            "bikes_allowed",
        ],
        &feed.trips,
        |mut row, trip| {
            row.push_bind(trip.trip_id.as_str())
                .push_bind(trip.route_id.as_str())
                .push_bind(trip.service_id.as_str())
                .push_bind(trip.trip_headsign.as_deref())
                .push_bind(trip.trip_short_name.as_deref())
                .push_bind(trip.direction_id)
                .push_bind(trip.block_id.as_deref())
                .push_bind(trip.shape_id.as_deref())
                .push_bind(trip.wheelchair_accessible)
                .push_bind(trip.bikes_allowed);
        },
    )
    .await?;

    let stop_times = bulk_insert(
        &mut *tx,
        "stop_times",
        &[
            "trip_id",
            "arrival_time",
            "departure_time",
            "stop_id",
            "stop_sequence",
            "stop_headsign",
            "pickup_type",
            "drop_off_type",
            "shape_dist_traveled",
            "timepoint",
        ],
        &feed.stop_times,
        |mut row, stop_time| {
            row.push_bind(stop_time.trip_id.as_str())
                .push_bind(stop_time.arrival_time.as_deref())
                .push_bind(stop_time.departure_time.as_deref())
                .push_bind(stop_time.stop_id.as_str())
                .push_bind(i64::from(stop_time.stop_sequence))
                .push_bind(stop_time.stop_headsign.as_deref())
                .push_bind(stop_time.pickup_type)
                .push_bind(stop_time.drop_off_type)
                .push_bind(stop_time.shape_dist_traveled)
                .push_bind(stop_time.timepoint);
        },
    )
    .await?;

    let import_id = ledger::record_success(&mut *tx, source).await?;
    tx.commit().await?;

    Ok(LoadSummary {
        import_id,
        agencies,
        stops,
        routes,
        trips,
        stop_times,
        calendar_dates,
    })
}

/// Multi-row `INSERT` of `rows` into `table`, chunked under SQLite's bind
/// parameter limit. `bind` must push exactly one value per column.
async fn bulk_insert<'r, T>(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[&str],
    rows: &'r [T],
    mut bind: impl FnMut(Separated<'_, 'r, Sqlite, &'static str>, &'r T),
) -> Result<u64, sqlx::Error> {
    let rows_per_chunk = (MAX_BIND_PARAMS / columns.len()).max(1);
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_chunk) {
        let mut builder: QueryBuilder<'r, Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {table} ({}) ", columns.join(", ")));
        builder.push_values(chunk, |row, item| bind(row, item));
        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    info!(table, rows = inserted, "Inserted rows");
    Ok(inserted)
}
