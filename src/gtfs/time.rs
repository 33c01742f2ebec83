//! GTFS service-day times.
//!
//! GTFS writes stop times relative to the start of the service day, so a
//! trip reaching a stop ten minutes after midnight is written `24:10:00`.
//! [`GtfsTime`] keeps that extended form; [`NormalizedTime`] is the
//! wall-clock time plus a flag recording that the time rolled past midnight.

use std::fmt;

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::TimeError;

/// Largest hour GTFS allows: a trip may run up to 24h past its service day.
pub const MAX_GTFS_HOUR: u32 = 47;

/// A parsed `HH:MM:SS` GTFS time where `HH` may be 24..=47.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GtfsTime {
    hours: u32,
    wall: NaiveTime,
}

impl GtfsTime {
    /// Parses an extended GTFS time such as `"08:05:00"`, `"8:05:00"` or `"25:40:00"`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError`] when the input does not have exactly three
    /// numeric fields, when minutes or seconds are out of range, or when the
    /// hour exceeds [`MAX_GTFS_HOUR`].
    pub fn parse(input: &str) -> Result<Self, TimeError> {
        let invalid = || TimeError(input.to_string());

        let mut parts = input.trim().split(':');
        let (h, m, s) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(m), Some(s), None) => (h, m, s),
            _ => return Err(invalid()),
        };

        let field = |raw: &str| -> Result<u32, TimeError> {
            if raw.is_empty() || raw.len() > 2 || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            raw.parse().map_err(|_| invalid())
        };

        let hours = field(h)?;
        if hours > MAX_GTFS_HOUR {
            return Err(invalid());
        }
        let wall = NaiveTime::from_hms_opt(hours % 24, field(m)?, field(s)?).ok_or_else(invalid)?;

        Ok(Self { hours, wall })
    }

    /// Hour as written in the feed, possibly 24 or more.
    pub fn hours(&self) -> u32 {
        self.hours
    }

    pub fn minutes(&self) -> u32 {
        self.wall.minute()
    }

    pub fn seconds(&self) -> u32 {
        self.wall.second()
    }

    /// Drops the service-day offset, keeping the rollover as a flag.
    pub fn normalize(&self) -> NormalizedTime {
        NormalizedTime {
            rollover: self.hours >= 24,
            time: self.wall,
        }
    }
}

impl fmt::Display for GtfsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours,
            self.minutes(),
            self.seconds()
        )
    }
}

/// Wall-clock time within a day plus whether it belongs to the day after
/// the service day.
///
/// Ordering compares `rollover` first, so `24:10:00` (00:10, rolled over)
/// sorts after `23:50:00` even though its wall-clock time is smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedTime {
    pub rollover: bool,
    pub time: NaiveTime,
}

impl NormalizedTime {
    /// Resolves this time on `service_date` into an absolute instant in `tz`.
    ///
    /// The UTC offset comes from the zone rules for the resolved date, so it
    /// follows daylight-saving transitions. Ambiguous local times (clocks
    /// falling back) take the earlier instant; times inside a spring-forward
    /// gap use the offset in effect before the gap.
    pub fn resolve_local(&self, service_date: NaiveDate, tz: &Tz) -> DateTime<Tz> {
        let date = if self.rollover {
            service_date + Days::new(1)
        } else {
            service_date
        };
        let naive = date.and_time(self.time);

        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                let before = tz
                    .offset_from_utc_datetime(&(naive - Duration::days(1)))
                    .fix();
                let utc = naive - Duration::seconds(i64::from(before.local_minus_utc()));
                tz.from_utc_datetime(&utc)
            }
        }
    }
}

impl fmt::Display for NormalizedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time.format("%H:%M:%S"))
    }
}

/// String form of normalization: `"25:07:30"` becomes `"01:07:30"`. The
/// hour is always written with two digits, so an unpadded `"8:05:00"` comes
/// back as `"08:05:00"`.
pub fn normalize_time_str(input: &str) -> Result<String, TimeError> {
    Ok(GtfsTime::parse(input)?.normalize().to_string())
}
