use crate::components::calendar::{CalendarResponse, CalendarService, DayQuery};
use crate::config::Config;
use crate::error::{config_error, Error};
use crate::shutdown;
use crate::utils::retry::retry_with_backoff;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Build version, filled in by the release pipeline
pub const BUILD_VERSION: &str = match option_env!("BUILD_VERSION") {
    Some(version) => version,
    None => "Unknown",
};

/// Git commit the binary was built from
pub const COMMIT_ID: &str = match option_env!("COMMIT_ID") {
    Some(commit) => commit,
    None => "",
};

/// Service version reported in every response
pub fn version() -> String {
    format!("{}.{}", BUILD_VERSION, COMMIT_ID)
}

/// Initialize logging with the configured filter
pub fn init_logging(filter: &str) -> miette::Result<()> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{}': {}, using 'info'", filter, e);
        EnvFilter::new("info")
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load the application config
pub fn load_config() -> miette::Result<Config> {
    Ok(Config::load()?)
}

/// Build the query from command line arguments, falling back to config
///
/// Accepts `[URL] [TIMEZONE]` or a single JSON request such as
/// `{"url": "...", "timezone": "America/New_York"}`.
pub fn query_from_args<I>(args: I, config: &Config) -> Result<DayQuery, Error>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();

    if let [single] = args.as_slice() {
        if single.trim_start().starts_with('{') {
            return Ok(serde_json::from_str(single)?);
        }
    }

    let calendar_url = args
        .first()
        .cloned()
        .or_else(|| config.calendar_url.clone())
        .ok_or_else(|| config_error("No calendar url given; pass one or set CALENDAR_URL"))?;
    let timezone = args.get(1).cloned().unwrap_or_else(|| config.timezone.clone());

    Ok(DayQuery {
        calendar_url,
        timezone,
    })
}

/// Run one query with retries and cancellation, then stamp the version
pub async fn run(config: &Config, query: DayQuery) -> miette::Result<CalendarResponse> {
    let service = CalendarService::new(&config.service_config())?;

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    let service_ref = &service;
    let query_ref = &query;
    let cancel_ref = &cancel;
    let result = retry_with_backoff(config.fetch_retries, config.retry_backoff(), &cancel, move || {
        service_ref.handle(query_ref, cancel_ref)
    })
    .await;

    // Stop the signal listener
    cancel.cancel();
    let _ = signal_task.await;

    match result {
        Ok(response) => {
            info!(events = response.events.len(), "Calendar query finished");
            Ok(response.with_version(version()))
        }
        Err(e) => {
            error!("problem getting calendar events: {}", e);
            Err(e.into())
        }
    }
}
