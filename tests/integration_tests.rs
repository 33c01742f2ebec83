use std::collections::HashMap;
use std::io::{Cursor, Write};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use gtfs_departures::departures::{DepartureQuery, ServicePatterns};
use gtfs_departures::error::{FeedError, FetchError, LoadError};
use gtfs_departures::fetch::HttpClient;
use gtfs_departures::gtfs::filter::FeedFilter;
use gtfs_departures::ledger::ImportLedger;
use gtfs_departures::loader::FeedLoader;
use gtfs_departures::scheduler::LoadScheduler;
use gtfs_departures::store::Store;
use zip::write::SimpleFileOptions;

const FEED_URL: &str = "https://transit.example.com/gtfs.zip";

const AGENCY: &str = "agency_id,agency_name,agency_url,agency_timezone
A,Metro,https://example.com,America/New_York
";

const STOPS: &str = "stop_id,stop_code,stop_name,stop_lat,stop_lon
1001,21055,Main St & 1st Ave,38.90,-77.03
1002,20714,Main St & 9th Ave,38.91,-77.02
1003,99999,Depot,38.80,-77.10
";

const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_type
21,A,123,Crosstown,3
55,A,555,Express,3
";

const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign,direction_id
21,3,T1,Downtown,0
21,3,T2,Downtown,0
21,1,T3,Downtown,0
55,3,T9,Airport,1
";

const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence
T1,17:42:00,17:42:00,1001,1
T1,17:50:00,17:50:00,1002,2
T2,18:05:00,18:05:00,1001,1
T3,17:50:00,17:50:00,1001,1
T9,17:45:00,17:45:00,1001,1
";

const CALENDAR_DATES: &str = "service_id,date,exception_type
3,20240704,2
";

/// Serves a canned response per URL and 404 for everything else.
#[derive(Default)]
struct FixtureClient {
    responses: HashMap<String, Vec<u8>>,
}

impl FixtureClient {
    fn serving(url: &str, body: Vec<u8>) -> Self {
        let mut client = Self::default();
        client.responses.insert(url.to_string(), body);
        client
    }
}

#[async_trait]
impl HttpClient for FixtureClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let resp = match self.responses.get(req.url().as_str()) {
            Some(body) => http::Response::builder().status(200).body(body.clone()),
            None => http::Response::builder().status(404).body(Vec::new()),
        };
        Ok(reqwest::Response::from(resp.unwrap()))
    }
}

fn zip_feed(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn full_feed() -> Vec<(&'static str, &'static str)> {
    vec![
        ("agency.txt", AGENCY),
        ("stops.txt", STOPS),
        ("routes.txt", ROUTES),
        ("trips.txt", TRIPS),
        ("stop_times.txt", STOP_TIMES),
        ("calendar_dates.txt", CALENDAR_DATES),
    ]
}

fn replacing(files: &[(&'static str, &'static str)], name: &str, content: &'static str) -> Vec<(&'static str, &'static str)> {
    files
        .iter()
        .map(|(file, body)| if *file == name { (*file, content) } else { (*file, *body) })
        .collect()
}

async fn store() -> Store {
    let store = Store::in_memory().await.unwrap();
    store.migrate().await.unwrap();
    store
}

fn loader(store: &Store, body: Vec<u8>) -> FeedLoader<FixtureClient> {
    FeedLoader::new(
        FixtureClient::serving(FEED_URL, body),
        store.clone(),
        FeedFilter::deployment_default(),
    )
}

fn query(store: &Store) -> DepartureQuery {
    DepartureQuery::new(store.clone(), ServicePatterns::default(), New_York)
}

/// 2024-06-04 is a Tuesday.
fn tuesday_at(h: u32, m: u32) -> DateTime<Tz> {
    New_York.with_ymd_and_hms(2024, 6, 4, h, m, 0).unwrap()
}

async fn count(store: &Store, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .unwrap();
    n
}

#[tokio::test]
async fn test_load_then_query_weekday_scenario() {
    let store = store().await;
    loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();

    let times = query(&store)
        .next_departures_at("21055", "123", tuesday_at(17, 30))
        .await
        .unwrap();

    assert_eq!(times, ["5:42PM", "6:05PM"]);
}

#[tokio::test]
async fn test_load_applies_filter() {
    let store = store().await;
    let summary = loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();

    // stop 99999 and route 55's trip are outside the allow-lists
    assert_eq!(summary.stops, 2);
    assert_eq!(summary.trips, 3);
    assert_eq!(summary.stop_times, 4);
    assert_eq!(summary.routes, 2);
    assert_eq!(summary.calendar_dates, 1);
    assert_eq!(count(&store, "stop_times").await, 4);
}

#[tokio::test]
async fn test_ledger_latest_entry_is_last_load() {
    let store = store().await;
    let summary = loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();

    let ledger = ImportLedger::new(store.clone(), New_York, None);
    let recent = ledger.authorized_recent_imports(None).await.unwrap();

    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].record.id, summary.import_id);
    assert_eq!(recent[0].record.url, FEED_URL);
    assert!(recent[0].record.success);
    assert_eq!(recent[0].record.error, None);
}

#[tokio::test]
async fn test_reload_removes_dropped_stop() {
    let store = store().await;
    loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();

    let without_main_st = replacing(
        &full_feed(),
        "stops.txt",
        "stop_id,stop_code,stop_name,stop_lat,stop_lon
1002,20714,Main St & 9th Ave,38.91,-77.02
",
    );
    loader(&store, zip_feed(&without_main_st))
        .load_url(FEED_URL)
        .await
        .unwrap();

    let times = query(&store)
        .next_departures_at("21055", "123", tuesday_at(17, 30))
        .await
        .unwrap();
    assert!(times.is_empty());

    let times = query(&store)
        .next_departures_at("20714", "123", tuesday_at(17, 30))
        .await
        .unwrap();
    assert_eq!(times, ["5:50PM"]);
}

#[tokio::test]
async fn test_malformed_feed_keeps_previous_data() {
    let store = store().await;
    loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();

    let bad_times = replacing(
        &full_feed(),
        "stop_times.txt",
        "trip_id,arrival_time,departure_time,stop_id,stop_sequence
T1,17:42:00,17:42:00,1001,1
T2,six pm,18:05:00,1001,1
",
    );
    let err = loader(&store, zip_feed(&bad_times))
        .load_url(FEED_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Feed(FeedError::InvalidTime { line: 3, .. })
    ));

    let times = query(&store)
        .next_departures_at("21055", "123", tuesday_at(17, 30))
        .await
        .unwrap();
    assert_eq!(times, ["5:42PM", "6:05PM"]);

    let recent = ImportLedger::new(store.clone(), New_York, None)
        .recent_imports(5)
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);
    assert!(!recent[0].record.success);
    assert!(recent[0].record.error.as_deref().unwrap().contains("invalid time"));
    assert!(recent[1].record.success);
}

#[tokio::test]
async fn test_missing_required_file_aborts() {
    let store = store().await;
    let files: Vec<_> = full_feed()
        .into_iter()
        .filter(|(name, _)| *name != "stop_times.txt")
        .collect();

    let err = loader(&store, zip_feed(&files))
        .load_url(FEED_URL)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::Feed(FeedError::MissingFile("stop_times.txt"))
    ));
    assert_eq!(count(&store, "stops").await, 0);
    assert_eq!(count(&store, "imports").await, 1);
}

#[tokio::test]
async fn test_missing_optional_file_is_tolerated() {
    let store = store().await;
    let files: Vec<_> = full_feed()
        .into_iter()
        .filter(|(name, _)| *name != "calendar_dates.txt")
        .collect();

    let summary = loader(&store, zip_feed(&files))
        .load_url(FEED_URL)
        .await
        .unwrap();

    assert_eq!(summary.calendar_dates, 0);
    assert_eq!(summary.stop_times, 4);
}

#[tokio::test]
async fn test_http_error_is_recorded() {
    let store = store().await;
    let loader = loader(&store, zip_feed(&full_feed()));

    let err = loader
        .load_url("https://transit.example.com/missing.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Fetch(FetchError::Status(s)) if s.as_u16() == 404));

    let recent = ImportLedger::new(store.clone(), New_York, None)
        .recent_imports(5)
        .await
        .unwrap();
    assert_eq!(recent[0].record.url, "https://transit.example.com/missing.zip");
    assert!(!recent[0].record.success);
}

#[tokio::test]
async fn test_load_from_local_archive() {
    let store = store().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gtfs.zip");
    std::fs::write(&path, zip_feed(&full_feed())).unwrap();

    let loader = FeedLoader::new(
        FixtureClient::default(),
        store.clone(),
        FeedFilter::deployment_default(),
    );
    loader.load_source(path.to_str().unwrap()).await.unwrap();

    let times = query(&store)
        .next_departures_at("21055", "123", tuesday_at(17, 30))
        .await
        .unwrap();
    assert_eq!(times, ["5:42PM", "6:05PM"]);
}

#[tokio::test]
async fn test_not_a_zip_is_rejected() {
    let store = store().await;

    let err = loader(&store, b"<html>maintenance</html>".to_vec())
        .load_url(FEED_URL)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Feed(FeedError::Archive(_))));
}

#[tokio::test]
async fn test_scheduler_acknowledges_then_loads() {
    let store = store().await;
    let scheduler = LoadScheduler::new(loader(&store, zip_feed(&full_feed())), 1);

    let ack = scheduler.trigger(FEED_URL);
    assert_eq!(ack.url, FEED_URL);

    let summary = ack.wait().await.unwrap();
    assert_eq!(summary.stops, 2);

    let times = query(&store)
        .next_departures_at("21055", "123", tuesday_at(17, 30))
        .await
        .unwrap();
    assert_eq!(times, ["5:42PM", "6:05PM"]);
}

#[tokio::test]
async fn test_saturday_uses_saturday_pattern() {
    let store = store().await;
    loader(&store, zip_feed(&full_feed()))
        .load_url(FEED_URL)
        .await
        .unwrap();
    let saturday = New_York.with_ymd_and_hms(2024, 6, 8, 17, 30, 0).unwrap();

    let times = query(&store)
        .next_departures_at("21055", "123", saturday)
        .await
        .unwrap();

    assert_eq!(times, ["5:50PM"]);
}
