use super::values::{
    param, parse_duration, parse_event_time, parse_time_list, parse_until, unescape_text, EventTime,
};
use crate::components::calendar::models::RawOccurrence;
use crate::error::{parse_error, CalendarResult, Error};
use crate::utils::time::rewrite_to_local;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use ical::IcalParser;
use rrule::{RRule, Unvalidated};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Upper bound on recurrence instances kept per event near the window
const MAX_EXPANSION: usize = 50_000;

/// Window and zone settings for one parse
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// First instant of the window
    pub start: DateTime<Utc>,
    /// Last instant of the window, inclusive
    pub end: DateTime<Utc>,
    /// Zone used to place date-only events on the local calendar
    pub all_day_zone: Tz,
}

impl ParseOptions {
    /// Whether an occurrence spanning `[start, end)` touches the window
    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && (end > self.start || start >= self.start)
    }
}

/// One VEVENT with its values decoded
struct DecodedEvent {
    uid: String,
    summary: String,
    description: String,
    start: EventTime,
    duration: Duration,
    rrule: Option<String>,
    exdates: Vec<EventTime>,
    rdates: Vec<EventTime>,
    recurrence_id: Option<EventTime>,
}

/// Parse a feed and return the occurrences that touch the window
///
/// Recurring events are expanded with EXDATE, RDATE and RECURRENCE-ID
/// applied. Events come out in file order, instances of one event in
/// chronological order.
pub fn parse_events_for_day(
    body: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> CalendarResult<Vec<RawOccurrence>> {
    let mut decoded_events = Vec::new();

    for calendar in IcalParser::new(body) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let calendar =
            calendar.map_err(|e| parse_error(&format!("problem parsing calendar file: {}", e)))?;

        // Floating times follow the calendar's own zone when it names one
        let floating = calendar
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case("X-WR-TIMEZONE"))
            .and_then(|p| p.value.as_deref())
            .and_then(|name| name.trim().parse::<Tz>().ok())
            .unwrap_or(options.all_day_zone);

        for event in &calendar.events {
            if let Some(decoded) = decode_event(event, floating)? {
                decoded_events.push(decoded);
            }
        }
    }

    debug!(count = decoded_events.len(), "Decoded calendar events");

    // Instances replaced by a RECURRENCE-ID override, keyed by uid
    let mut overridden: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
    for decoded in &decoded_events {
        if let Some(recurrence_id) = &decoded.recurrence_id {
            overridden
                .entry(decoded.uid.as_str())
                .or_default()
                .push(recurrence_id.instant());
        }
    }

    let mut occurrences = Vec::new();
    for decoded in &decoded_events {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let starts = match (&decoded.rrule, &decoded.recurrence_id) {
            (Some(rule), None) => {
                let replaced = overridden.get(decoded.uid.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                expand(decoded, rule, replaced, options, cancel)?
            }
            _ => vec![decoded.start.instant()],
        };

        for start in starts {
            let end = start + decoded.duration;
            let (window_start, window_end) = if decoded.start.is_date() {
                (
                    rewrite_to_local(start, &options.all_day_zone).with_timezone(&Utc),
                    rewrite_to_local(end, &options.all_day_zone).with_timezone(&Utc),
                )
            } else {
                (start, end)
            };

            if !options.overlaps(window_start, window_end) {
                continue;
            }

            trace!(uid = %decoded.uid, start = %start, end = %end, "Occurrence in window");
            occurrences.push(RawOccurrence {
                uid: decoded.uid.clone(),
                summary: decoded.summary.clone(),
                description: decoded.description.clone(),
                start,
                end,
            });
        }
    }

    Ok(occurrences)
}

fn find<'a>(event: &'a IcalEvent, name: &str) -> Option<&'a Property> {
    event
        .properties
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

fn text(event: &IcalEvent, name: &str) -> String {
    find(event, name)
        .and_then(|p| p.value.as_deref())
        .map(unescape_text)
        .unwrap_or_default()
}

fn time_of(property: &Property, floating: Tz) -> CalendarResult<Option<EventTime>> {
    let Some(value) = property.value.as_deref() else {
        return Ok(None);
    };
    let is_date = param(property, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
    parse_event_time(value, param(property, "TZID"), is_date, floating).map(Some)
}

/// Decode one VEVENT, or `None` when it has no usable start
fn decode_event(event: &IcalEvent, floating: Tz) -> CalendarResult<Option<DecodedEvent>> {
    let uid = text(event, "UID");

    let start = match find(event, "DTSTART") {
        Some(property) => time_of(property, floating)?,
        None => None,
    };
    let Some(start) = start else {
        warn!(uid = %uid, "Skipping event without DTSTART");
        return Ok(None);
    };

    let end = match find(event, "DTEND") {
        Some(property) => time_of(property, floating)?,
        None => None,
    };

    let duration = match (end, find(event, "DURATION").and_then(|p| p.value.as_deref())) {
        (Some(end), _) => end.instant() - start.instant(),
        (None, Some(raw)) => parse_duration(raw)?,
        // RFC 5545: a date start lasts one day, a date-time start is instantaneous
        (None, None) if start.is_date() => Duration::days(1),
        (None, None) => Duration::zero(),
    };

    if duration < Duration::zero() {
        return Err(parse_error(&format!("event '{}' ends before it starts", uid)));
    }

    let mut exdates = Vec::new();
    let mut rdates = Vec::new();
    for property in &event.properties {
        if property.name.eq_ignore_ascii_case("EXDATE") {
            exdates.extend(parse_time_list(property, floating)?);
        } else if property.name.eq_ignore_ascii_case("RDATE") {
            rdates.extend(parse_time_list(property, floating)?);
        }
    }

    let recurrence_id = match find(event, "RECURRENCE-ID") {
        Some(property) => time_of(property, floating)?,
        None => None,
    };

    Ok(Some(DecodedEvent {
        summary: text(event, "SUMMARY"),
        description: text(event, "DESCRIPTION"),
        rrule: find(event, "RRULE").and_then(|p| p.value.clone()),
        uid,
        start,
        duration,
        exdates,
        rdates,
        recurrence_id,
    }))
}

/// Start instants of a recurring event up to the end of the window
fn expand(
    decoded: &DecodedEvent,
    rule: &str,
    replaced: &[DateTime<Utc>],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> CalendarResult<Vec<DateTime<Utc>>> {
    let dt_start = decoded.start.to_rrule();
    let zone = dt_start.timezone();

    let mut exdates: Vec<DateTime<rrule::Tz>> = decoded.exdates.iter().map(EventTime::to_rrule).collect();
    exdates.extend(replaced.iter().map(|dt| dt.with_timezone(&zone)));

    let invalid = |e: &dyn std::fmt::Display| {
        parse_error(&format!("invalid RRULE '{}' on event '{}': {}", rule, decoded.uid, e))
    };

    // The rrule crate reads date and floating UNTIL values as system-local,
    // so the bound is resolved here in the zone of DTSTART
    let (rule_body, until) = split_until(rule);
    let mut parsed = rule_body
        .parse::<RRule<Unvalidated>>()
        .map_err(|e| invalid(&e))?;
    if let Some(raw) = until {
        let until = parse_until(raw, decoded.start.zone())
            .map_err(|e| invalid(&e))?
            .max(dt_start.with_timezone(&Utc));
        parsed = parsed.until(until.with_timezone(&rrule::Tz::UTC));
    }

    // Earliest start that could still reach into the window
    let horizon = options.start - decoded.duration - Duration::days(1);
    let last = options.end + Duration::days(1);

    let set = parsed
        .build(dt_start)
        .map_err(|e| invalid(&e))?
        .set_exdates(exdates)
        .set_rdates(decoded.rdates.iter().map(EventTime::to_rrule).collect())
        .after(horizon.with_timezone(&zone))
        .before(last.with_timezone(&zone));

    let mut starts = Vec::new();
    for (walked, instance) in (&set).into_iter().enumerate() {
        if walked % 1024 == 0 && cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let start = instance.with_timezone(&Utc);
        if start > last {
            break;
        }
        if start < horizon {
            continue;
        }
        if starts.len() >= MAX_EXPANSION {
            warn!(uid = %decoded.uid, rule = %rule, "Recurrence expansion limit reached");
            break;
        }
        starts.push(start);
    }

    Ok(starts)
}

/// Take the UNTIL part out of an RRULE value
fn split_until(rule: &str) -> (String, Option<&str>) {
    let mut until = None;
    let mut parts = Vec::new();
    for part in rule.split(';') {
        match part.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("UNTIL") => {
                until = Some(value.trim());
            }
            _ => parts.push(part),
        }
    }
    (parts.join(";"), until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options(zone: Tz, y: i32, m: u32, d: u32) -> ParseOptions {
        let window = crate::components::calendar::time::day_window(
            zone.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap().with_timezone(&Utc),
            zone,
        );
        ParseOptions {
            start: window.start.with_timezone(&Utc),
            end: window.end.with_timezone(&Utc),
            all_day_zone: zone,
        }
    }

    fn calendar(events: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n{}END:VCALENDAR\r\n",
            events
        )
    }

    fn parse(body: &str, options: &ParseOptions) -> Vec<RawOccurrence> {
        parse_events_for_day(body.as_bytes(), options, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_single_timed_event() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:one\r\nSUMMARY:Standup\r\nDTSTART:20220220T150000Z\r\nDTEND:20220220T151500Z\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::America__New_York, 2022, 2, 20));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "one");
        assert_eq!(events[0].summary, "Standup");
        assert_eq!(events[0].description, "");
        assert_eq!(events[0].end - events[0].start, Duration::minutes(15));
    }

    #[test]
    fn test_event_on_other_day_is_skipped() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:one\r\nDTSTART:20220221T150000Z\r\nDTEND:20220221T160000Z\r\nEND:VEVENT\r\n",
        );
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 20)).is_empty());
    }

    #[test]
    fn test_event_at_next_midnight_is_skipped() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:late\r\nDTSTART;TZID=America/New_York:20220221T000000\r\nDTEND;TZID=America/New_York:20220221T010000\r\nEND:VEVENT\r\n",
        );
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 20)).is_empty());
    }

    #[test]
    fn test_event_ending_at_window_start_is_skipped() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:yesterday\r\nDTSTART;VALUE=DATE:20220219\r\nDTEND;VALUE=DATE:20220220\r\nEND:VEVENT\r\n",
        );
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 20)).is_empty());
    }

    #[test]
    fn test_all_day_event_is_emitted_as_utc_midnight() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:trip\r\nDTSTART;VALUE=DATE:20220218\r\nDTEND;VALUE=DATE:20220222\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::America__New_York, 2022, 2, 20));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, Utc.with_ymd_and_hms(2022, 2, 18, 0, 0, 0).unwrap());
        assert_eq!(events[0].end, Utc.with_ymd_and_hms(2022, 2, 22, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_all_day_event_uses_local_dates_for_the_window() {
        // Starts on the 18th: not part of the 17th even though UTC midnight
        // falls inside the 17th in New York
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:trip\r\nDTSTART;VALUE=DATE:20220218\r\nDTEND;VALUE=DATE:20220222\r\nEND:VEVENT\r\n",
        );
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 17)).is_empty());
    }

    #[test]
    fn test_weekly_rule_with_exdate() {
        let event = "BEGIN:VEVENT\r\nUID:call\r\nSUMMARY:Call\r\nDTSTART;TZID=America/New_York:20201220T173000\r\nDTEND;TZID=America/New_York:20201220T183000\r\nEXDATE;TZID=America/New_York:20220220T173000\r\nRRULE:FREQ=WEEKLY\r\nEND:VEVENT\r\n";
        let body = calendar(event);

        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 20)).is_empty());

        let next_week = parse(&body, &options(Tz::America__New_York, 2022, 2, 27));
        assert_eq!(next_week.len(), 1);
        assert_eq!(
            next_week[0].start,
            Tz::America__New_York
                .with_ymd_and_hms(2022, 2, 27, 17, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_weekly_rule_keeps_wall_clock_across_dst() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:call\r\nDTSTART;TZID=America/New_York:20220220T173000\r\nDTEND;TZID=America/New_York:20220220T183000\r\nRRULE:FREQ=WEEKLY;COUNT=10\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::America__New_York, 2022, 3, 20));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start.to_rfc3339(), "2022-03-20T21:30:00+00:00");
    }

    #[test]
    fn test_all_day_rule_with_date_until() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:bins\r\nSUMMARY:Bins out\r\nDTSTART;VALUE=DATE:20220201\r\nDTEND;VALUE=DATE:20220202\r\nRRULE:FREQ=WEEKLY;UNTIL=20220301\r\nEND:VEVENT\r\n",
        );

        let events = parse(&body, &options(Tz::America__New_York, 2022, 2, 15));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, Utc.with_ymd_and_hms(2022, 2, 15, 0, 0, 0).unwrap());

        // The UNTIL date itself is still included
        assert_eq!(parse(&body, &options(Tz::America__New_York, 2022, 3, 1)).len(), 1);
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 3, 8)).is_empty());
    }

    #[test]
    fn test_floating_rule_with_floating_until() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:walk\r\nDTSTART:20220201T090000\r\nDTEND:20220201T100000\r\nRRULE:FREQ=DAILY;UNTIL=20220210T090000\r\nEND:VEVENT\r\n",
        );

        let events = parse(&body, &options(Tz::America__New_York, 2022, 2, 10));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start.to_rfc3339(), "2022-02-10T14:00:00+00:00");
        assert!(parse(&body, &options(Tz::America__New_York, 2022, 2, 11)).is_empty());
    }

    #[test]
    fn test_zoned_rule_with_utc_until() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:call\r\nDTSTART;TZID=Europe/Helsinki:20220201T090000\r\nDTEND;TZID=Europe/Helsinki:20220201T093000\r\nRRULE:FREQ=DAILY;UNTIL=20220205T070000Z\r\nEND:VEVENT\r\n",
        );
        assert_eq!(parse(&body, &options(Tz::Europe__Helsinki, 2022, 2, 5)).len(), 1);
        assert!(parse(&body, &options(Tz::Europe__Helsinki, 2022, 2, 6)).is_empty());
    }

    #[test]
    fn test_long_running_rule_reaches_today() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:tick\r\nDTSTART:20150101T000000Z\r\nRRULE:FREQ=HOURLY\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::UTC, 2022, 2, 20));

        assert_eq!(events.len(), 24);
        assert_eq!(events[0].start, Utc.with_ymd_and_hms(2022, 2, 20, 0, 0, 0).unwrap());
        assert_eq!(events[23].start, Utc.with_ymd_and_hms(2022, 2, 20, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_split_until() {
        let (rule, until) = split_until("FREQ=WEEKLY;UNTIL=20220301;BYDAY=TU");
        assert_eq!(rule, "FREQ=WEEKLY;BYDAY=TU");
        assert_eq!(until, Some("20220301"));

        let (rule, until) = split_until("FREQ=DAILY;COUNT=3");
        assert_eq!(rule, "FREQ=DAILY;COUNT=3");
        assert_eq!(until, None);
    }

    #[test]
    fn test_recurrence_id_replaces_instance() {
        let events = "BEGIN:VEVENT\r\nUID:gym\r\nSUMMARY:Gym\r\nDTSTART:20220201T120000Z\r\nDTEND:20220201T130000Z\r\nRRULE:FREQ=DAILY\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:gym\r\nSUMMARY:Gym (moved)\r\nRECURRENCE-ID:20220220T120000Z\r\nDTSTART:20220220T170000Z\r\nDTEND:20220220T180000Z\r\nEND:VEVENT\r\n";
        let found = parse(&calendar(events), &options(Tz::UTC, 2022, 2, 20));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].summary, "Gym (moved)");
        assert_eq!(found[0].start, Utc.with_ymd_and_hms(2022, 2, 20, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_duration_property() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:d\r\nDTSTART:20220220T100000Z\r\nDURATION:PT45M\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::UTC, 2022, 2, 20));
        assert_eq!(events[0].end - events[0].start, Duration::minutes(45));
    }

    #[test]
    fn test_date_without_end_lasts_one_day() {
        let body = calendar("BEGIN:VEVENT\r\nUID:d\r\nDTSTART;VALUE=DATE:20220220\r\nEND:VEVENT\r\n");
        let events = parse(&body, &options(Tz::UTC, 2022, 2, 20));
        assert_eq!(events[0].end - events[0].start, Duration::days(1));
    }

    #[test]
    fn test_floating_time_uses_calendar_zone() {
        let body = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nX-WR-TIMEZONE:Asia/Tokyo\r\nBEGIN:VEVENT\r\nUID:f\r\nDTSTART:20220220T090000\r\nDTEND:20220220T100000\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let events = parse(body, &options(Tz::Asia__Tokyo, 2022, 2, 20));
        assert_eq!(events[0].start, Utc.with_ymd_and_hms(2022, 2, 20, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_text_is_unescaped() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:t\r\nSUMMARY:Lunch\\, coffee\r\nDESCRIPTION:Line one\\nLine two\r\nDTSTART:20220220T100000Z\r\nEND:VEVENT\r\n",
        );
        let events = parse(&body, &options(Tz::UTC, 2022, 2, 20));
        assert_eq!(events[0].summary, "Lunch, coffee");
        assert_eq!(events[0].description, "Line one\nLine two");
    }

    #[test]
    fn test_bad_rrule_is_a_parse_error() {
        let body = calendar(
            "BEGIN:VEVENT\r\nUID:bad\r\nDTSTART:20220220T100000Z\r\nRRULE:FREQ=SOMETIMES\r\nEND:VEVENT\r\n",
        );
        let result = parse_events_for_day(
            body.as_bytes(),
            &options(Tz::UTC, 2022, 2, 20),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_bad_date_is_a_parse_error() {
        let body = calendar("BEGIN:VEVENT\r\nUID:bad\r\nDTSTART:someday\r\nEND:VEVENT\r\n");
        let result = parse_events_for_day(
            body.as_bytes(),
            &options(Tz::UTC, 2022, 2, 20),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_cancelled_parse() {
        let body = calendar("BEGIN:VEVENT\r\nUID:a\r\nDTSTART:20220220T100000Z\r\nEND:VEVENT\r\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = parse_events_for_day(body.as_bytes(), &options(Tz::UTC, 2022, 2, 20), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_zero_length_event_at_window_start() {
        let body = calendar("BEGIN:VEVENT\r\nUID:z\r\nDTSTART:20220220T000000Z\r\nEND:VEVENT\r\n");
        let events = parse(&body, &options(Tz::UTC, 2022, 2, 20));
        assert_eq!(events.len(), 1);
    }
}
