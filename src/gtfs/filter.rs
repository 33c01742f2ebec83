//! Prunes a regional feed down to the routes and stops this deployment shows.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::{GtfsFeed, Stop, StopTime, Trip};

/// Route-id and stop-code allow-lists.
///
/// An empty list places no restriction on its entity. Routes, agencies and
/// calendar dates always pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub route_ids: BTreeSet<String>,
    pub stop_codes: BTreeSet<String>,
}

impl FeedFilter {
    pub fn new<R, S>(route_ids: R, stop_codes: S) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            route_ids: route_ids.into_iter().map(Into::into).collect(),
            stop_codes: stop_codes.into_iter().map(Into::into).collect(),
        }
    }

    /// The routes and stops the display was originally deployed for.
    pub fn deployment_default() -> Self {
        Self::new(["21", "237", "234"], ["20714", "21073", "21055"])
    }

    pub fn keeps_trip(&self, trip: &Trip) -> bool {
        self.route_ids.is_empty() || self.route_ids.contains(&trip.route_id)
    }

    pub fn keeps_stop(&self, stop: &Stop) -> bool {
        self.stop_codes.is_empty()
            || stop
                .stop_code
                .as_deref()
                .is_some_and(|code| self.stop_codes.contains(code))
    }

    /// Trip ids that survived [`FeedFilter::keeps_trip`]. Stop-times are
    /// filtered against this set, so it must be built from the complete
    /// filtered trip list.
    pub fn surviving_trip_ids(trips: &[Trip]) -> HashSet<String> {
        trips.iter().map(|trip| trip.trip_id.clone()).collect()
    }

    pub fn keeps_stop_time(surviving_trips: &HashSet<String>, stop_time: &StopTime) -> bool {
        surviving_trips.contains(&stop_time.trip_id)
    }

    /// Filters trips and stops, then stop-times against the surviving trips.
    ///
    /// This is the in-memory form for an already parsed feed.
    /// [`read_feed`](super::reader::read_feed) applies the same predicates in
    /// the same order while streaming rows, and must keep giving the same
    /// result.
    pub fn apply(&self, feed: GtfsFeed) -> GtfsFeed {
        let mut feed = feed;

        feed.trips.retain(|trip| self.keeps_trip(trip));
        feed.stops.retain(|stop| self.keeps_stop(stop));

        let surviving = Self::surviving_trip_ids(&feed.trips);
        feed.stop_times
            .retain(|stop_time| Self::keeps_stop_time(&surviving, stop_time));

        feed
    }
}
