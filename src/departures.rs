//! Next scheduled departures for a stop and route.
//!
//! Which trips run "today" is approximated from the local day of week
//! (Saturday, Sunday or weekday service). `calendar_dates` exceptions are
//! not consulted, so holidays run on their weekday pattern.
//!
//! Two service days are live at any moment: today's, and yesterday's
//! trips written past `24:00:00` that are still running after midnight.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gtfs::time::{GtfsTime, NormalizedTime};
use crate::store::Store;

/// Departures returned per query unless configured otherwise.
pub const DEFAULT_LIMIT: usize = 2;

const DISPLAY_FORMAT: &str = "%-I:%M%p";

const UPCOMING_SQL: &str = r#"
    SELECT st.stop_id, st.trip_id, t.trip_headsign, t.service_id, st.arrival_time
    FROM stop_times st
    JOIN stops s ON s.stop_id = st.stop_id
    JOIN trips t ON t.trip_id = st.trip_id
    JOIN routes r ON r.route_id = t.route_id
    WHERE s.stop_code = ?
      AND r.route_short_name = ?
      AND t.service_id IN (?, ?)
"#;

/// Day-of-week bucket standing in for full calendar resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceDay {
    Saturday,
    Sunday,
    Weekday,
}

impl ServiceDay {
    pub fn for_date(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat => ServiceDay::Saturday,
            Weekday::Sun => ServiceDay::Sunday,
            _ => ServiceDay::Weekday,
        }
    }
}

/// `service_id` the feed uses for each [`ServiceDay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePatterns {
    pub saturday: String,
    pub sunday: String,
    pub weekday: String,
}

impl Default for ServicePatterns {
    fn default() -> Self {
        Self {
            saturday: "1".to_string(),
            sunday: "2".to_string(),
            weekday: "3".to_string(),
        }
    }
}

impl ServicePatterns {
    pub fn service_id(&self, day: ServiceDay) -> &str {
        match day {
            ServiceDay::Saturday => &self.saturday,
            ServiceDay::Sunday => &self.sunday,
            ServiceDay::Weekday => &self.weekday,
        }
    }
}

/// One upcoming stop-time, resolved to an absolute local instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub stop_id: String,
    pub trip_id: String,
    pub trip_headsign: Option<String>,
    /// Arrival as written in the feed, e.g. `"24:10:00"`.
    pub arrival_time: String,
    pub normalized: NormalizedTime,
    /// Service day the arrival is counted from.
    pub service_date: NaiveDate,
    pub local_time: DateTime<Tz>,
}

impl Departure {
    /// 12-hour clock without a leading zero, e.g. `"5:42PM"`.
    pub fn display_time(&self) -> String {
        self.local_time.format(DISPLAY_FORMAT).to_string()
    }
}

#[derive(Clone, Debug)]
pub struct DepartureQuery {
    store: Store,
    patterns: ServicePatterns,
    fallback_timezone: Tz,
    limit: usize,
}

impl DepartureQuery {
    pub fn new(store: Store, patterns: ServicePatterns, fallback_timezone: Tz) -> Self {
        Self {
            store,
            patterns,
            fallback_timezone,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Next departures from now, in the agency timezone.
    pub async fn next_departures(
        &self,
        stop_code: &str,
        route_name: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let tz = self.store.agency_timezone(self.fallback_timezone).await?;
        let now = Utc::now().with_timezone(&tz);
        self.next_departures_at(stop_code, route_name, now).await
    }

    /// Next departures after `now`, formatted for display. `now` must be
    /// expressed in the agency timezone.
    pub async fn next_departures_at(
        &self,
        stop_code: &str,
        route_name: &str,
        now: DateTime<Tz>,
    ) -> Result<Vec<String>, sqlx::Error> {
        let upcoming = self.upcoming_at(stop_code, route_name, now).await?;
        Ok(upcoming.iter().map(Departure::display_time).collect())
    }

    /// Stop-times strictly after `now`, ordered by stop id then local
    /// arrival instant, at most `limit` of them.
    ///
    /// Candidates are today's service pattern plus the rolled-over rows of
    /// yesterday's pattern, which fall between midnight and the end of last
    /// night's service. An unknown stop code or route name yields an empty
    /// list.
    pub async fn upcoming_at(
        &self,
        stop_code: &str,
        route_name: &str,
        now: DateTime<Tz>,
    ) -> Result<Vec<Departure>, sqlx::Error> {
        let tz = now.timezone();
        let today = now.date_naive();
        let today_service = self.patterns.service_id(ServiceDay::for_date(today));
        let yesterday = today
            .pred_opt()
            .map(|date| (date, self.patterns.service_id(ServiceDay::for_date(date))));

        let rows: Vec<(String, String, Option<String>, String, Option<String>)> =
            sqlx::query_as(UPCOMING_SQL)
                .bind(stop_code)
                .bind(route_name)
                .bind(today_service)
                .bind(yesterday.map_or(today_service, |(_, service)| service))
                .fetch_all(self.store.pool())
                .await?;
        let candidates = rows.len();

        let mut upcoming = Vec::new();
        for (stop_id, trip_id, trip_headsign, service_id, arrival_time) in rows {
            let Some(arrival_time) = arrival_time else {
                continue;
            };
            let normalized = match GtfsTime::parse(&arrival_time) {
                Ok(time) => time.normalize(),
                Err(e) => {
                    warn!(trip_id = %trip_id, error = %e, "Skipping stored stop-time with bad arrival");
                    continue;
                }
            };

            // a weekday row can count for both days, e.g. 24:10 on Tuesday
            // night and again on Wednesday night
            let mut service_dates = Vec::with_capacity(2);
            if service_id == today_service {
                service_dates.push(today);
            }
            if let Some((date, service)) = yesterday {
                if service_id == service && normalized.rollover {
                    service_dates.push(date);
                }
            }

            for service_date in service_dates {
                let local_time = normalized.resolve_local(service_date, &tz);
                if local_time > now {
                    upcoming.push(Departure {
                        stop_id: stop_id.clone(),
                        trip_id: trip_id.clone(),
                        trip_headsign: trip_headsign.clone(),
                        arrival_time: arrival_time.clone(),
                        normalized,
                        service_date,
                        local_time,
                    });
                }
            }
        }

        upcoming.sort_by(|a, b| {
            a.stop_id
                .cmp(&b.stop_id)
                .then(a.local_time.cmp(&b.local_time))
        });
        upcoming.truncate(self.limit);

        debug!(
            stop_code,
            route_name,
            today_service,
            candidates,
            returned = upcoming.len(),
            "Computed upcoming departures"
        );
        Ok(upcoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::{Agency, GtfsFeed, Route, Stop, StopTime, Trip};
    use crate::loader::replace_feed;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn feed(arrivals: &[(&str, &str)]) -> GtfsFeed {
        let trips = arrivals
            .iter()
            .map(|(trip_id, _)| Trip {
                route_id: "21".to_string(),
                service_id: "3".to_string(),
                trip_id: trip_id.to_string(),
                trip_headsign: Some("Downtown".to_string()),
                trip_short_name: None,
                direction_id: Some(0),
                block_id: None,
                shape_id: None,
                wheelchair_accessible: None,
                bikes_allowed: None,
            })
            .collect();
        let stop_times = arrivals
            .iter()
            .map(|(trip_id, arrival)| StopTime {
                trip_id: trip_id.to_string(),
                arrival_time: Some(arrival.to_string()),
                departure_time: Some(arrival.to_string()),
                stop_id: "1001".to_string(),
                stop_sequence: 1,
                stop_headsign: None,
                pickup_type: None,
                drop_off_type: None,
                shape_dist_traveled: None,
                timepoint: None,
            })
            .collect();

        GtfsFeed {
            agencies: vec![Agency {
                agency_id: Some("A".to_string()),
                agency_name: "Metro".to_string(),
                agency_url: "https://example.com".to_string(),
                agency_timezone: "America/New_York".to_string(),
                agency_lang: None,
                agency_phone: None,
                agency_fare_url: None,
                agency_email: None,
            }],
            stops: vec![Stop {
                stop_id: "1001".to_string(),
                stop_code: Some("21055".to_string()),
                stop_name: Some("Main St".to_string()),
                stop_desc: None,
                stop_lat: Some(38.9),
                stop_lon: Some(-77.0),
                zone_id: None,
                stop_url: None,
                location_type: None,
                parent_station: None,
                stop_timezone: None,
                wheelchair_boarding: None,
            }],
            routes: vec![Route {
                route_id: "21".to_string(),
                agency_id: Some("A".to_string()),
                route_short_name: Some("123".to_string()),
                route_long_name: Some("Crosstown".to_string()),
                route_desc: None,
                route_type: 3,
                route_url: None,
                route_color: None,
                route_text_color: None,
            }],
            trips,
            stop_times,
            calendar_dates: vec![],
        }
    }

    async fn query_for(arrivals: &[(&str, &str)]) -> DepartureQuery {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        replace_feed(&store, &feed(arrivals), "test").await.unwrap();
        DepartureQuery::new(store, ServicePatterns::default(), New_York)
    }

    /// 2024-06-04 is a Tuesday.
    fn tuesday_at(h: u32, m: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2024, 6, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_service_day_buckets() {
        let date = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        assert_eq!(ServiceDay::for_date(date(1)), ServiceDay::Saturday);
        assert_eq!(ServiceDay::for_date(date(2)), ServiceDay::Sunday);
        assert_eq!(ServiceDay::for_date(date(3)), ServiceDay::Weekday);
        assert_eq!(ServiceDay::for_date(date(7)), ServiceDay::Weekday);

        let patterns = ServicePatterns::default();
        assert_eq!(patterns.service_id(ServiceDay::Saturday), "1");
        assert_eq!(patterns.service_id(ServiceDay::Sunday), "2");
        assert_eq!(patterns.service_id(ServiceDay::Weekday), "3");
    }

    #[tokio::test]
    async fn test_weekday_scenario() {
        let query = query_for(&[("T1", "17:42:00"), ("T2", "18:05:00"), ("T0", "17:10:00")]).await;

        let times = query
            .next_departures_at("21055", "123", tuesday_at(17, 30))
            .await
            .unwrap();

        assert_eq!(times, ["5:42PM", "6:05PM"]);
    }

    #[tokio::test]
    async fn test_limit_keeps_earliest() {
        let query = query_for(&[("T3", "19:00:00"), ("T1", "17:42:00"), ("T2", "18:05:00")])
            .await
            .with_limit(1);

        let times = query
            .next_departures_at("21055", "123", tuesday_at(17, 30))
            .await
            .unwrap();

        assert_eq!(times, ["5:42PM"]);
    }

    #[tokio::test]
    async fn test_rollover_after_now() {
        let query = query_for(&[("LATE", "24:10:00"), ("EVENING", "23:50:00")]).await;

        // 23:50 has passed; 00:10 belongs to later tonight
        let times = query
            .next_departures_at("21055", "123", tuesday_at(23, 55))
            .await
            .unwrap();
        assert_eq!(times, ["12:10AM"]);

        // both upcoming: rolled-over time sorts last despite its smaller wall clock
        let upcoming = query
            .upcoming_at("21055", "123", tuesday_at(23, 40))
            .await
            .unwrap();
        let trips: Vec<_> = upcoming.iter().map(|d| d.trip_id.as_str()).collect();
        assert_eq!(trips, ["EVENING", "LATE"]);
        assert_eq!(upcoming[1].local_time.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        assert_eq!(upcoming[1].display_time(), "12:10AM");
    }

    #[tokio::test]
    async fn test_just_after_midnight_includes_last_nights_rollover() {
        let query = query_for(&[("EARLY", "06:00:00"), ("LATER", "07:00:00"), ("LATE", "24:10:00")]).await;
        // Wednesday 00:05: Tuesday's 24:10 trip is five minutes out
        let now = New_York.with_ymd_and_hms(2024, 6, 5, 0, 5, 0).unwrap();

        let upcoming = query.upcoming_at("21055", "123", now).await.unwrap();

        let times: Vec<_> = upcoming.iter().map(Departure::display_time).collect();
        assert_eq!(times, ["12:10AM", "6:00AM"]);
        assert_eq!(upcoming[0].trip_id, "LATE");
        assert_eq!(upcoming[0].service_date, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        assert_eq!(upcoming[1].service_date, NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
    }

    #[tokio::test]
    async fn test_rollover_from_previous_pattern_only() {
        let query = query_for(&[("EVENING", "23:50:00"), ("LATE", "24:10:00")]).await;
        // Saturday 00:05: Friday's weekday trips still running, Saturday has none
        let now = New_York.with_ymd_and_hms(2024, 6, 8, 0, 5, 0).unwrap();

        let times = query.next_departures_at("21055", "123", now).await.unwrap();

        assert_eq!(times, ["12:10AM"]);
    }

    #[tokio::test]
    async fn test_nothing_left_today_is_empty() {
        let query = query_for(&[("T1", "06:00:00"), ("T2", "07:00:00")]).await;

        let times = query
            .next_departures_at("21055", "123", tuesday_at(22, 0))
            .await
            .unwrap();

        assert!(times.is_empty());
    }

    #[tokio::test]
    async fn test_departure_exactly_now_is_excluded() {
        let query = query_for(&[("T1", "17:30:00"), ("T2", "17:31:00")]).await;

        let times = query
            .next_departures_at("21055", "123", tuesday_at(17, 30))
            .await
            .unwrap();

        assert_eq!(times, ["5:31PM"]);
    }

    #[tokio::test]
    async fn test_unknown_stop_or_route_is_empty() {
        let query = query_for(&[("T1", "17:42:00")]).await;
        let now = tuesday_at(17, 30);

        assert!(query.next_departures_at("00000", "123", now).await.unwrap().is_empty());
        assert!(query.next_departures_at("21055", "999", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_weekend_uses_other_pattern() {
        let query = query_for(&[("T1", "17:42:00")]).await;
        // Saturday: feed only has weekday (service "3") trips
        let saturday = New_York.with_ymd_and_hms(2024, 6, 8, 17, 30, 0).unwrap();

        let times = query.next_departures_at("21055", "123", saturday).await.unwrap();

        assert!(times.is_empty());
    }

    #[tokio::test]
    async fn test_user_input_is_not_interpreted_as_sql() {
        let query = query_for(&[("T1", "17:42:00")]).await;

        let times = query
            .next_departures_at("21055' OR '1'='1", "123", tuesday_at(17, 30))
            .await
            .unwrap();

        assert!(times.is_empty());
    }
}
