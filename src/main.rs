use icaltoday::error::Error;
use icaltoday::startup;
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Load configuration
    let config = startup::load_config()?;

    // Initialize logging
    startup::init_logging(&config.log_filter)?;

    info!("Starting icaltoday {}", startup::version());

    let query = startup::query_from_args(std::env::args().skip(1), &config)?;
    let response = startup::run(&config, query).await?;

    let output = serde_json::to_string_pretty(&response).map_err(Error::from)?;
    println!("{}", output);

    Ok(())
}
