use miette::Diagnostic;
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Timezone unavailable: {0}")]
    #[diagnostic(
        code(icaltoday::timezone_unavailable),
        help("use an IANA zone name such as America/New_York")
    )]
    TimezoneUnavailable(String),

    #[error("Problem creating request to the calendar url: {0}")]
    #[diagnostic(code(icaltoday::request))]
    RequestConstruction(String),

    #[error("Error fetching calendar data: {0}")]
    #[diagnostic(code(icaltoday::fetch))]
    Fetch(String),

    #[error("Problem parsing calendar: {0}")]
    #[diagnostic(code(icaltoday::parse))]
    Parse(String),

    #[error("Calendar query was cancelled")]
    #[diagnostic(code(icaltoday::cancelled))]
    Cancelled,

    #[error("Environment error: {0}")]
    #[diagnostic(code(icaltoday::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(icaltoday::config))]
    Config(String),

    #[error(transparent)]
    #[diagnostic(code(icaltoday::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(icaltoday::serialization))]
    Serialization(String),
}

impl Error {
    /// Whether a fresh attempt at the same request could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type CalendarResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(message: &str) -> Error {
    Error::Environment(message.to_string())
}

/// Helper to create timezone errors
pub fn timezone_error(timezone: &str, reason: impl std::fmt::Display) -> Error {
    Error::TimezoneUnavailable(format!("'{}': {}", timezone, reason))
}

/// Helper to create request construction errors
pub fn request_error(message: &str) -> Error {
    Error::RequestConstruction(message.to_string())
}

/// Helper to create fetch errors
pub fn fetch_error(message: &str) -> Error {
    Error::Fetch(message.to_string())
}

/// Helper to create parse errors
pub fn parse_error(message: &str) -> Error {
    Error::Parse(message.to_string())
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}
