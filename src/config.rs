use crate::components::calendar::ServiceConfig;
use crate::error::{env_error, CalendarResult};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default timezone when none is configured
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,reqwest=warn,hyper=warn";

/// Default location of the optional configuration file
pub const CONFIG_FILE: &str = "config/icaltoday.toml";

/// Main configuration structure for the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Calendar feed to query when none is given on the command line
    pub calendar_url: Option<String>,
    /// IANA timezone for the day window
    pub timezone: String,
    /// Tracing filter directive
    pub log_filter: String,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Largest feed body accepted, in bytes
    pub max_body_bytes: usize,
    /// User-Agent sent to the feed provider
    pub user_agent: String,
    /// Extra fetch attempts made by the hosting layer
    pub fetch_retries: u32,
    /// Base delay between fetch attempts in milliseconds
    pub retry_backoff_ms: u64,
}

/// Values that may be set in `config/icaltoday.toml`
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    calendar_url: Option<String>,
    timezone: Option<String>,
    log_filter: Option<String>,
    request_timeout_secs: Option<u64>,
    max_body_bytes: Option<usize>,
    user_agent: Option<String>,
    fetch_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calendar_url: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: format!("icaltoday/{}", env!("CARGO_PKG_VERSION")),
            fetch_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    pub fn load() -> CalendarResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let mut config = Config::default();

        // File values first, environment wins
        if Path::new(CONFIG_FILE).exists() {
            let content = fs::read_to_string(CONFIG_FILE)?;
            config.merge_file(&content)?;
        }

        config.merge_env()?;
        Ok(config)
    }

    /// Overlay values from a TOML document
    pub fn merge_file(&mut self, content: &str) -> CalendarResult<()> {
        let file: FileConfig = toml::from_str(content)?;

        if file.calendar_url.is_some() {
            self.calendar_url = file.calendar_url;
        }
        if let Some(timezone) = file.timezone {
            self.timezone = timezone;
        }
        if let Some(log_filter) = file.log_filter {
            self.log_filter = log_filter;
        }
        if let Some(timeout) = file.request_timeout_secs {
            self.request_timeout_secs = timeout;
        }
        if let Some(max_body) = file.max_body_bytes {
            self.max_body_bytes = max_body;
        }
        if let Some(user_agent) = file.user_agent {
            self.user_agent = user_agent;
        }
        if let Some(retries) = file.fetch_retries {
            self.fetch_retries = retries;
        }
        if let Some(backoff) = file.retry_backoff_ms {
            self.retry_backoff_ms = backoff;
        }

        Ok(())
    }

    /// Overlay values from environment variables
    pub fn merge_env(&mut self) -> CalendarResult<()> {
        if let Ok(url) = env::var("CALENDAR_URL") {
            self.calendar_url = Some(url);
        }
        if let Ok(timezone) = env::var("TIMEZONE") {
            self.timezone = timezone;
        }
        // RUST_LOG takes precedence, matching EnvFilter conventions
        if let Ok(filter) = env::var("RUST_LOG").or_else(|_| env::var("LOG_FILTER")) {
            self.log_filter = filter;
        }
        if let Ok(user_agent) = env::var("USER_AGENT") {
            self.user_agent = user_agent;
        }

        self.request_timeout_secs =
            parse_env("REQUEST_TIMEOUT_SECS", self.request_timeout_secs)?;
        self.max_body_bytes = parse_env("MAX_BODY_BYTES", self.max_body_bytes)?;
        self.fetch_retries = parse_env("FETCH_RETRIES", self.fetch_retries)?;
        self.retry_backoff_ms = parse_env("RETRY_BACKOFF_MS", self.retry_backoff_ms)?;

        Ok(())
    }

    /// Settings handed to the calendar service at construction
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_body_bytes: self.max_body_bytes,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Base delay for the retry loop
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Parse a numeric environment variable, keeping the current value when unset
fn parse_env<T: FromStr>(name: &str, current: T) -> CalendarResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| env_error(&format!("Invalid {} format: {}", name, raw))),
        Err(_) => Ok(current),
    }
}
