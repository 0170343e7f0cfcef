pub mod models;
mod normalize;
mod service;
mod source;
pub mod time;

pub use models::{CalendarEvent, CalendarResponse, DayQuery, RawOccurrence};
pub use normalize::{normalize, ALL_DAY_THRESHOLD_HOURS, GOOGLE_CALENDAR_MARKER};
pub use service::{CalendarService, ServiceConfig};
pub use source::{feed_url, CalendarSource, HttpCalendarSource};
pub use time::{resolve_day_window, DayWindow};
