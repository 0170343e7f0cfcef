use super::service::ServiceConfig;
use crate::error::{fetch_error, request_error, CalendarResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Where raw calendar text comes from
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch the feed at `url` in a single attempt
    async fn fetch(&self, url: &str) -> CalendarResult<Vec<u8>>;
}

/// Fetches feeds over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpCalendarSource {
    client: Client,
    max_body_bytes: usize,
}

impl HttpCalendarSource {
    /// Create a source from service settings
    pub fn new(config: &ServiceConfig) -> CalendarResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| request_error(&format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

/// Validate a feed url, accepting `webcal://` as an alias for `https://`
pub fn feed_url(raw: &str) -> CalendarResult<Url> {
    let raw = raw.trim();
    let normalized = match raw.get(..9) {
        Some(prefix) if prefix.eq_ignore_ascii_case("webcal://") => format!("https://{}", &raw[9..]),
        _ => raw.to_string(),
    };

    let url = Url::parse(&normalized)
        .map_err(|e| request_error(&format!("invalid url '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(request_error(&format!("unsupported url scheme '{}'", scheme))),
    }
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn fetch(&self, url: &str) -> CalendarResult<Vec<u8>> {
        let url = feed_url(url)?;

        let response = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "text/calendar; charset=UTF-8")
            .header(ACCEPT, "text/calendar, */*;q=0.8")
            .send()
            .await
            .map_err(|e| {
                fetch_error(&format!(
                    "error when sending request to get the calendar data from the url: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(fetch_error(&format!(
                "Failed to fetch calendar: HTTP {} - {}",
                status,
                error_body.chars().take(200).collect::<String>()
            )));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| fetch_error(&format!("Failed to read calendar body: {}", e)))?;
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(fetch_error(&format!(
                    "calendar body exceeds {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "Fetched calendar body");
        Ok(body)
    }
}
