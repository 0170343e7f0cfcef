use crate::error::{timezone_error, Error};
use crate::utils::time::local_instant;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// The local calendar day an event query covers
///
/// `end` is 23:59:59 on the local clock, so an event starting at the
/// following midnight is outside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub zone: Tz,
    pub local_now: DateTime<Tz>,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

/// Resolve an IANA timezone name
pub fn resolve_timezone(timezone: &str) -> Result<Tz, Error> {
    timezone
        .trim()
        .parse::<Tz>()
        .map_err(|e| timezone_error(timezone, e))
}

/// Compute today's window for `now` in the named timezone
///
/// An unknown zone still yields a window, computed in UTC, together with a
/// `TimezoneUnavailable` error for the caller to report.
pub fn resolve_day_window(now: DateTime<Utc>, timezone: &str) -> (DayWindow, Option<Error>) {
    match resolve_timezone(timezone) {
        Ok(zone) => (day_window(now, zone), None),
        Err(e) => (day_window(now, Tz::UTC), Some(e)),
    }
}

/// Compute today's window for `now` in `zone`
pub fn day_window(now: DateTime<Utc>, zone: Tz) -> DayWindow {
    let local_now = now.with_timezone(&zone);
    let date = local_now.date_naive();

    let start = local_instant(&zone, &date.and_time(NaiveTime::MIN), false);
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    let end = local_instant(&zone, &date.and_time(last_second), true);

    DayWindow {
        zone,
        local_now,
        start,
        end,
    }
}
