use super::models::{CalendarEvent, RawOccurrence};
use crate::utils::time::rewrite_to_local;
use chrono::Duration;
use chrono_tz::Tz;
use std::collections::HashSet;
use tracing::{debug, info};

/// Substring identifying a Google Calendar feed
pub const GOOGLE_CALENDAR_MARKER: &str = "calendar.google.com";

/// Occurrences longer than this from a Google feed are treated as all-day
pub const ALL_DAY_THRESHOLD_HOURS: i64 = 23;

/// Turn parser output into the events returned to the caller
///
/// Google all-day events carry no timezone and come out of the parser as
/// UTC midnight. Those get their clock-face values re-labeled in `zone`;
/// everything else is converted into `zone` unchanged. The first occurrence
/// of a uid wins.
pub fn normalize<I>(occurrences: I, source_url: &str, zone: Tz) -> Vec<CalendarEvent>
where
    I: IntoIterator<Item = RawOccurrence>,
{
    let is_google = source_url.contains(GOOGLE_CALENDAR_MARKER);
    let mut seen: HashSet<String> = HashSet::new();
    let mut events = Vec::new();

    for occurrence in occurrences {
        // Duplicate ids show up in the wild; keep the first one
        if !seen.insert(occurrence.uid.clone()) {
            debug!(uid = %occurrence.uid, summary = %occurrence.summary, "Discarding duplicate event");
            continue;
        }

        let duration = occurrence.end - occurrence.start;

        let (start_time, end_time) =
            if is_google && duration > Duration::hours(ALL_DAY_THRESHOLD_HOURS) {
                let start = rewrite_to_local(occurrence.start, &zone);
                let end = rewrite_to_local(occurrence.end, &zone);
                info!(
                    url = %source_url,
                    summary = %occurrence.summary,
                    starttime = %occurrence.start,
                    endtime = %occurrence.end,
                    rewritten_starttime = %start,
                    rewritten_endtime = %end,
                    "Google all-day event detected, rewriting UTC start/end as local"
                );
                (start.fixed_offset(), end.fixed_offset())
            } else {
                (
                    occurrence.start.with_timezone(&zone).fixed_offset(),
                    occurrence.end.with_timezone(&zone).fixed_offset(),
                )
            };

        events.push(CalendarEvent {
            uid: occurrence.uid,
            summary: occurrence.summary,
            description: occurrence.description,
            start_time,
            end_time,
        });
    }

    events
}
