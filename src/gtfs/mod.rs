//! Static GTFS records and the pipeline pieces that operate on them.
//!
//! Only the columns this service stores are modelled; unknown columns in a
//! feed are ignored when parsing.

pub mod filter;
pub mod reader;
pub mod time;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

/// A row of `agency.txt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Agency {
    pub agency_id: Option<String>,
    pub agency_name: String,
    pub agency_url: String,
    /// IANA timezone identifier governing every time in the feed.
    pub agency_timezone: String,
    pub agency_lang: Option<String>,
    pub agency_phone: Option<String>,
    pub agency_fare_url: Option<String>,
    pub agency_email: Option<String>,
}

/// A row of `stops.txt`. Queries look stops up by `stop_code`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_code: Option<String>,
    pub stop_name: Option<String>,
    pub stop_desc: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub zone_id: Option<String>,
    pub stop_url: Option<String>,
    pub location_type: Option<i32>,
    pub parent_station: Option<String>,
    pub stop_timezone: Option<String>,
    pub wheelchair_boarding: Option<i32>,
}

/// A row of `routes.txt`. Queries look routes up by `route_short_name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub agency_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_desc: Option<String>,
    pub route_type: i32,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
}

/// A row of `trips.txt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    pub trip_headsign: Option<String>,
    pub trip_short_name: Option<String>,
    pub direction_id: Option<i32>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
    pub wheelchair_accessible: Option<i32>,
    pub bikes_allowed: Option<i32>,
}

/// A row of `stop_times.txt`.
///
/// Times are kept as written (`HH:MM:SS`, hour possibly 24 or more); see
/// [`time::GtfsTime`] for their interpretation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub stop_headsign: Option<String>,
    pub pickup_type: Option<i32>,
    pub drop_off_type: Option<i32>,
    pub shape_dist_traveled: Option<f64>,
    pub timepoint: Option<i32>,
}

/// A row of `calendar_dates.txt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalendarDate {
    pub service_id: String,
    #[serde(deserialize_with = "parse_gtfs_date")]
    pub date: NaiveDate,
    /// 1 = service added on `date`, 2 = service removed.
    pub exception_type: i32,
}

/// Every table of one feed, as loaded into the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GtfsFeed {
    pub agencies: Vec<Agency>,
    pub stops: Vec<Stop>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTime>,
    pub calendar_dates: Vec<CalendarDate>,
}

/// GTFS dates are written `YYYYMMDD`.
fn parse_gtfs_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(&raw, "%Y%m%d").map_err(serde::de::Error::custom)
}
