use super::models::{CalendarResponse, DayQuery};
use super::normalize::normalize;
use super::source::{CalendarSource, HttpCalendarSource};
use super::time::resolve_day_window;
use crate::components::ics::{parse_events_for_day, ParseOptions};
use crate::error::{CalendarResult, Error};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Settings fixed when the service is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: format!("icaltoday/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Answers "what is on the calendar today" queries
#[derive(Clone)]
pub struct CalendarService {
    source: Arc<dyn CalendarSource>,
}

impl CalendarService {
    /// Create a service that fetches feeds over HTTP
    pub fn new(config: &ServiceConfig) -> CalendarResult<Self> {
        Ok(Self::with_source(Arc::new(HttpCalendarSource::new(config)?)))
    }

    /// Create a service around any calendar source
    pub fn with_source(source: Arc<dyn CalendarSource>) -> Self {
        Self { source }
    }

    /// Get today's events from the feed at `url`, with "today" taken in `timezone`
    pub async fn get_todays_events(
        &self,
        url: &str,
        timezone: &str,
    ) -> CalendarResult<CalendarResponse> {
        self.get_events_at(Utc::now(), url, timezone, &CancellationToken::new())
            .await
    }

    /// Run an inbound query until it completes or `cancel` fires
    pub async fn handle(
        &self,
        query: &DayQuery,
        cancel: &CancellationToken,
    ) -> CalendarResult<CalendarResponse> {
        self.get_events_at(Utc::now(), &query.calendar_url, &query.timezone, cancel)
            .await
    }

    /// Get the events of the day containing `now`
    pub async fn get_events_at(
        &self,
        now: DateTime<Utc>,
        url: &str,
        timezone: &str,
        cancel: &CancellationToken,
    ) -> CalendarResult<CalendarResponse> {
        let (window, timezone_err) = resolve_day_window(now, timezone);
        if let Some(e) = timezone_err {
            error!(
                timezone = %timezone,
                error = %e,
                "Error setting location from the timezone, continuing in UTC"
            );
        }

        info!(
            current_local_time = %window.local_now,
            start = %window.start,
            end = %window.end,
            timezone = %timezone,
            url = %url,
            "Resolved day window"
        );

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = self.source.fetch(url) => body?,
        };

        let options = ParseOptions {
            start: window.start.with_timezone(&Utc),
            end: window.end.with_timezone(&Utc),
            all_day_zone: window.zone,
        };
        let occurrences = parse_events_for_day(&body, &options, cancel)?;
        let events = normalize(occurrences, url, window.zone);

        info!(count = events.len(), "Found events for today");

        Ok(CalendarResponse::new(
            timezone,
            window.local_now.fixed_offset(),
            events,
        ))
    }
}
