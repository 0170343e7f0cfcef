use crate::error::{parse_error, CalendarResult};
use crate::utils::time::local_instant;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::property::Property;
use tracing::warn;

/// A DTSTART/DTEND/EXDATE style value once its zone has been settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// `VALUE=DATE`; no time of day and no zone of its own
    Date(NaiveDate),
    /// A concrete instant together with the zone it was written in
    DateTime(DateTime<Tz>),
}

impl EventTime {
    /// The instant handed to the normalizer; dates read as UTC midnight
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(date) => Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)),
            EventTime::DateTime(dt) => dt.with_timezone(&Utc),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Zone the value is expanded in; dates live on the UTC calendar
    pub fn zone(&self) -> Tz {
        match self {
            EventTime::Date(_) => Tz::UTC,
            EventTime::DateTime(dt) => dt.timezone(),
        }
    }

    /// The value as the recurrence engine wants it
    pub fn to_rrule(&self) -> DateTime<rrule::Tz> {
        match self {
            EventTime::Date(_) => self.instant().with_timezone(&rrule::Tz::UTC),
            EventTime::DateTime(dt) => dt.with_timezone(&rrule::Tz::Tz(dt.timezone())),
        }
    }
}

/// First parameter value of a property, with surrounding quotes removed
pub fn param<'a>(property: &'a Property, name: &str) -> Option<&'a str> {
    property
        .params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|value| value.trim_matches('"'))
}

/// Parse a single date or date-time value
///
/// `floating` is used for values without `Z` or a usable `TZID`.
pub fn parse_event_time(raw: &str, tzid: Option<&str>, is_date: bool, floating: Tz) -> CalendarResult<EventTime> {
    let raw = raw.trim();

    if is_date || (raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit())) {
        let date = NaiveDate::parse_from_str(raw, "%Y%m%d")
            .map_err(|e| parse_error(&format!("invalid date '{}': {}", raw, e)))?;
        return Ok(EventTime::Date(date));
    }

    if let Some(utc) = raw.strip_suffix('Z') {
        let naive = parse_naive(utc)?;
        return Ok(EventTime::DateTime(Tz::UTC.from_utc_datetime(&naive)));
    }

    let naive = parse_naive(raw)?;
    let zone = match tzid {
        Some(tzid) => resolve_tzid(tzid, floating),
        None => floating,
    };
    Ok(EventTime::DateTime(local_instant(&zone, &naive, false)))
}

/// Parse every value of a list property such as EXDATE or RDATE
pub fn parse_time_list(property: &Property, floating: Tz) -> CalendarResult<Vec<EventTime>> {
    let Some(value) = property.value.as_deref() else {
        return Ok(Vec::new());
    };
    let tzid = param(property, "TZID");
    let is_date = param(property, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_event_time(part, tzid, is_date, floating))
        .collect()
}

/// Read an RRULE `UNTIL` value as an instant, in the zone of the event start
///
/// A date bound covers that whole day. Floating values are wall-clock time
/// in `zone`.
pub fn parse_until(raw: &str, zone: Tz) -> CalendarResult<DateTime<Utc>> {
    match parse_event_time(raw, None, false, zone)? {
        EventTime::Date(date) => {
            let last_second = date
                .and_hms_opt(23, 59, 59)
                .ok_or_else(|| parse_error(&format!("invalid UNTIL '{}'", raw)))?;
            Ok(local_instant(&zone, &last_second, true).with_timezone(&Utc))
        }
        EventTime::DateTime(dt) => Ok(dt.with_timezone(&Utc)),
    }
}

fn parse_naive(raw: &str) -> CalendarResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .map_err(|e| parse_error(&format!("invalid date-time '{}': {}", raw, e)))
}

/// Map a TZID to an IANA zone, falling back for names we cannot resolve
fn resolve_tzid(tzid: &str, fallback: Tz) -> Tz {
    // Some producers prefix the id with a slash
    let name = tzid.trim().trim_start_matches('/');
    match name.parse::<Tz>() {
        Ok(zone) => zone,
        Err(_) => {
            warn!(tzid = %tzid, fallback = %fallback, "Unknown TZID, using fallback zone");
            fallback
        }
    }
}

/// Parse an RFC 5545 DURATION such as `PT1H30M`, `P1D` or `-P2W`
pub fn parse_duration(raw: &str) -> CalendarResult<Duration> {
    let invalid = || parse_error(&format!("invalid duration '{}'", raw));

    let mut rest = raw.trim();
    let negative = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    rest = rest.strip_prefix('P').ok_or_else(invalid)?;

    let mut total = Duration::zero();
    let mut in_time = false;
    let mut digits = String::new();
    let mut saw_component = false;

    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'T' if !in_time && digits.is_empty() => in_time = true,
            unit => {
                let amount: i64 = digits.parse().map_err(|_| invalid())?;
                digits.clear();
                let part = match (unit, in_time) {
                    ('W', false) => Duration::weeks(amount),
                    ('D', false) => Duration::days(amount),
                    ('H', true) => Duration::hours(amount),
                    ('M', true) => Duration::minutes(amount),
                    ('S', true) => Duration::seconds(amount),
                    _ => return Err(invalid()),
                };
                total += part;
                saw_component = true;
            }
        }
    }

    if !digits.is_empty() || !saw_component {
        return Err(invalid());
    }

    Ok(if negative { -total } else { total })
}

/// Undo RFC 5545 TEXT escaping
pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
