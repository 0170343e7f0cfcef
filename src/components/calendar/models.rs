use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Inbound request: which feed to read and which timezone defines "today"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayQuery {
    #[serde(rename = "url")]
    pub calendar_url: String,
    pub timezone: String,
}

/// One occurrence as produced by the calendar parser
///
/// Date-only values arrive as UTC-midnight labeled instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOccurrence {
    pub uid: String,
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A normalized calendar event happening today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub summary: String,
    pub description: String,
    #[serde(rename = "starttime")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(rename = "endtime")]
    pub end_time: DateTime<FixedOffset>,
}

/// Everything returned for one day query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarResponse {
    /// The timezone used
    pub timezone: String,
    /// Current local time in the timezone given
    #[serde(rename = "currentlocaltime")]
    pub current_local_time: DateTime<FixedOffset>,
    pub events: Vec<CalendarEvent>,
    /// Service version, filled in by the caller
    pub version: String,
}

impl CalendarResponse {
    /// Assemble a response; the version stays empty until the caller sets it
    pub fn new(
        timezone: impl Into<String>,
        current_local_time: DateTime<FixedOffset>,
        events: Vec<CalendarEvent>,
    ) -> Self {
        Self {
            timezone: timezone.into(),
            current_local_time,
            events,
            version: String::new(),
        }
    }

    /// Stamp the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}
