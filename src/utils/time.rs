use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Longest DST gap we step over when a local time does not exist
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Map a wall-clock time in `zone` to an instant
///
/// Ambiguous times pick the earlier instant, or the later one when `latest`
/// is set. Times inside a DST gap move forward to the first valid minute.
pub fn local_instant(zone: &Tz, naive: &NaiveDateTime, latest: bool) -> DateTime<Tz> {
    let mut candidate = *naive;
    for _ in 0..=MAX_GAP_MINUTES {
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, last) => {
                return if latest { last } else { earliest };
            }
            LocalResult::None => candidate += Duration::minutes(1),
        }
    }
    // No zone has a gap this long; read the time as UTC instead
    zone.from_utc_datetime(naive)
}

/// Re-label a UTC instant's clock-face values as wall-clock time in `zone`
///
/// `2022-02-18T00:00:00Z` becomes `2022-02-18T00:00:00` local. The instant
/// moves; the displayed numbers do not.
pub fn rewrite_to_local(instant: DateTime<Utc>, zone: &Tz) -> DateTime<Tz> {
    local_instant(zone, &instant.naive_utc(), false)
}
